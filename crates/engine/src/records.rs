//! Ledger entries and the drafts they are created from.
//!
//! Records are append/delete only: a draft is validated, written to the
//! remote store, and comes back as a record once the store pushes the next
//! snapshot.

use std::{cmp::Ordering, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{Currency, LedgerError, Money, remote::Document};

/// Opaque record identity assigned by the remote store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The two record collections every owner has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Sales,
    Expenses,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Sales, CollectionKind::Expenses];

    /// Path segment used by remote stores.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Expenses => "expenses",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CollectionKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" | "sale" => Ok(Self::Sales),
            "expenses" | "expense" => Ok(Self::Expenses),
            other => Err(LedgerError::Validation(format!(
                "unknown collection: {other}"
            ))),
        }
    }
}

/// Behaviour shared by [`SaleRecord`] and [`ExpenseRecord`].
pub trait LedgerRecord: DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Collection the record lives in.
    const KIND: CollectionKind;

    fn id(&self) -> &RecordId;
    fn date(&self) -> NaiveDate;
    fn created_at(&self) -> DateTime<Utc>;

    /// Decodes a stored document, using the document id as record id.
    fn from_document(document: Document) -> Result<Self, serde_json::Error> {
        let Document { id, mut data } = document;
        data.insert("id".to_string(), Value::String(id));
        serde_json::from_value(Value::Object(data))
    }
}

/// User supplied data for a record that does not exist yet.
pub trait Draft: Send {
    type Record: LedgerRecord;

    /// Validates the draft and returns the document body to write.
    ///
    /// Fails with [`LedgerError::Validation`] on the first missing or invalid
    /// field.
    fn into_fields(self, created_at: DateTime<Utc>) -> Result<Map<String, Value>, LedgerError>;
}

/// A sale of `quantity` units at `amount` each.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub id: RecordId,
    pub date: NaiveDate,
    pub product: String,
    pub quantity: f64,
    pub amount: f64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl SaleRecord {
    /// Unit amount × quantity, in the sale's own currency.
    #[must_use]
    pub fn total(&self) -> Money {
        Money::new(self.amount * self.quantity, self.currency)
    }
}

impl LedgerRecord for SaleRecord {
    const KIND: CollectionKind = CollectionKind::Sales;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// An expense; `amount` is already the total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: RecordId,
    pub date: NaiveDate,
    pub category: String,
    pub amount: f64,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl ExpenseRecord {
    #[must_use]
    pub fn total(&self) -> Money {
        Money::new(self.amount, self.currency)
    }
}

impl LedgerRecord for ExpenseRecord {
    const KIND: CollectionKind = CollectionKind::Expenses;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SaleDraft {
    pub date: String,
    pub product: String,
    pub quantity: Option<f64>,
    pub amount: Option<f64>,
    pub currency: Currency,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpenseDraft {
    pub date: String,
    pub category: String,
    pub amount: Option<f64>,
    pub currency: Currency,
}

#[derive(Serialize)]
struct NewSale<'a> {
    date: NaiveDate,
    product: &'a str,
    quantity: f64,
    amount: f64,
    currency: Currency,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct NewExpense<'a> {
    date: NaiveDate,
    category: &'a str,
    amount: f64,
    currency: Currency,
    created_at: DateTime<Utc>,
}

impl Draft for SaleDraft {
    type Record = SaleRecord;

    fn into_fields(self, created_at: DateTime<Utc>) -> Result<Map<String, Value>, LedgerError> {
        let date = required_date(&self.date)?;
        let product = required_text("product", &self.product)?;
        let quantity = required_number("quantity", self.quantity)?;
        let amount = required_number("amount", self.amount)?;

        to_fields(&NewSale {
            date,
            product,
            quantity,
            amount,
            currency: self.currency,
            created_at,
        })
    }
}

impl Draft for ExpenseDraft {
    type Record = ExpenseRecord;

    fn into_fields(self, created_at: DateTime<Utc>) -> Result<Map<String, Value>, LedgerError> {
        let date = required_date(&self.date)?;
        let category = required_text("category", &self.category)?;
        let amount = required_number("amount", self.amount)?;

        to_fields(&NewExpense {
            date,
            category,
            amount,
            currency: self.currency,
            created_at,
        })
    }
}

fn required_text<'a>(field: &str, value: &'a str) -> Result<&'a str, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn required_date(value: &str) -> Result<NaiveDate, LedgerError> {
    let raw = required_text("date", value)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| LedgerError::Validation(format!("date must be YYYY-MM-DD, got {raw}")))
}

fn required_number(field: &str, value: Option<f64>) -> Result<f64, LedgerError> {
    match value {
        None => Err(LedgerError::Validation(format!("{field} is required"))),
        Some(v) if !v.is_finite() || v < 0.0 => Err(LedgerError::Validation(format!(
            "{field} must be a non-negative number"
        ))),
        Some(v) => Ok(v),
    }
}

fn to_fields<T: Serialize>(value: &T) -> Result<Map<String, Value>, LedgerError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(LedgerError::Validation("record is not an object".to_string())),
        Err(err) => Err(LedgerError::Validation(err.to_string())),
    }
}

/// Display order: date descending, then newest creation first, then id.
pub fn newest_first<R: LedgerRecord>(a: &R, b: &R) -> Ordering {
    b.date()
        .cmp(&a.date())
        .then_with(|| b.created_at().cmp(&a.created_at()))
        .then_with(|| a.id().cmp(b.id()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn draft() -> SaleDraft {
        SaleDraft {
            date: "2024-01-01".to_string(),
            product: "Widget".to_string(),
            quantity: Some(2.0),
            amount: Some(10.0),
            currency: Currency::Usd,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn valid_sale_draft_produces_document_fields() {
        let fields = draft().into_fields(now()).unwrap();
        assert_eq!(fields["date"], "2024-01-01");
        assert_eq!(fields["product"], "Widget");
        assert_eq!(fields["quantity"], 2.0);
        assert_eq!(fields["amount"], 10.0);
        assert_eq!(fields["currency"], "USD");
        assert!(fields.contains_key("created_at"));
        assert!(!fields.contains_key("id"));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let mut missing_product = draft();
        missing_product.product = "   ".to_string();
        assert_eq!(
            missing_product.into_fields(now()),
            Err(LedgerError::Validation("product is required".to_string()))
        );

        let mut missing_quantity = draft();
        missing_quantity.quantity = None;
        assert!(missing_quantity.into_fields(now()).is_err());

        let mut negative = draft();
        negative.amount = Some(-1.0);
        assert!(negative.into_fields(now()).is_err());

        let mut bad_date = draft();
        bad_date.date = "01/02/2024".to_string();
        assert!(bad_date.into_fields(now()).is_err());

        let expense = ExpenseDraft {
            date: "2024-01-01".to_string(),
            category: String::new(),
            amount: Some(5.0),
            currency: Currency::Ves,
        };
        assert_eq!(
            expense.into_fields(now()),
            Err(LedgerError::Validation("category is required".to_string()))
        );
    }

    #[test]
    fn document_decodes_with_its_id() {
        let fields = draft().into_fields(now()).unwrap();
        let sale = SaleRecord::from_document(Document {
            id: "abc".to_string(),
            data: fields,
        })
        .unwrap();
        assert_eq!(sale.id, RecordId::from("abc"));
        assert_eq!(sale.total(), Money::usd(20.0));
    }

    #[test]
    fn ordering_breaks_date_ties_by_creation_time() {
        let base = SaleRecord::from_document(Document {
            id: "a".to_string(),
            data: draft().into_fields(now()).unwrap(),
        })
        .unwrap();
        let mut later = base.clone();
        later.id = RecordId::from("b");
        later.created_at = now() + chrono::Duration::minutes(5);
        let mut older_day = base.clone();
        older_day.id = RecordId::from("c");
        older_day.date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();

        let mut records = vec![older_day.clone(), base.clone(), later.clone()];
        records.sort_by(newest_first);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }
}
