use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Currency;

/// Current conversion factor, in VES per USD.
///
/// The rate is applied to every record at computation time regardless of
/// when the record was created. Any input that is not a finite positive
/// number is coerced to `0`, which makes USD amounts derived from VES
/// records collapse to `0` as well.
///
/// # Examples
///
/// ```rust
/// use engine::ExchangeRate;
///
/// assert_eq!(ExchangeRate::new(36.5).value(), 36.5);
/// assert_eq!(ExchangeRate::new(-4.0).value(), 0.0);
/// assert_eq!("abc".parse::<ExchangeRate>().unwrap().value(), 0.0);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct ExchangeRate(f64);

impl ExchangeRate {
    pub const UNSET: ExchangeRate = ExchangeRate(0.0);

    /// Creates a rate, coercing non-positive and non-finite values to `0`.
    #[must_use]
    pub fn new(value: f64) -> Self {
        if value.is_finite() && value > 0.0 {
            Self(value)
        } else {
            Self::UNSET
        }
    }

    /// Returns the raw VES-per-USD factor.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Returns `true` if division-based conversions are meaningful.
    #[must_use]
    pub fn is_usable(self) -> bool {
        self.0 > 0.0
    }
}

impl From<f64> for ExchangeRate {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<ExchangeRate> for f64 {
    fn from(value: ExchangeRate) -> Self {
        value.0
    }
}

impl FromStr for ExchangeRate {
    type Err = std::convert::Infallible;

    /// Parses user input. Accepts `.` or `,` as decimal separator; anything
    /// unparsable becomes `0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0);
        Ok(Self::new(value))
    }
}

impl fmt::Display for ExchangeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} VES/USD", self.0)
    }
}

/// Converts `amount` to USD. VES amounts are divided by the rate, or yield
/// `0` when the rate is unset.
#[must_use]
pub fn to_usd(amount: f64, currency: Currency, rate: ExchangeRate) -> f64 {
    match currency {
        Currency::Usd => amount,
        Currency::Ves if rate.is_usable() => amount / rate.value(),
        Currency::Ves => 0.0,
    }
}

/// Converts `amount` to VES by multiplying USD amounts by the rate.
#[must_use]
pub fn to_ves(amount: f64, currency: Currency, rate: ExchangeRate) -> f64 {
    match currency {
        Currency::Ves => amount,
        Currency::Usd => amount * rate.value(),
    }
}

/// An amount tagged with its currency.
///
/// No rounding happens on arithmetic or conversion; [`Money::format`] rounds
/// to two decimals for display only.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: Currency,
}

impl Money {
    #[must_use]
    pub const fn new(amount: f64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    #[must_use]
    pub const fn usd(amount: f64) -> Self {
        Self::new(amount, Currency::Usd)
    }

    #[must_use]
    pub const fn ves(amount: f64) -> Self {
        Self::new(amount, Currency::Ves)
    }

    /// Expresses this amount in `target` under `rate`.
    #[must_use]
    pub fn convert(self, target: Currency, rate: ExchangeRate) -> Money {
        let amount = match target {
            Currency::Usd => to_usd(self.amount, self.currency, rate),
            Currency::Ves => to_ves(self.amount, self.currency, rate),
        };
        Money::new(amount, target)
    }

    /// Formats as `$12.34` or `Bs. 12.34`, with a leading `-` for negatives.
    #[must_use]
    pub fn format(self) -> String {
        let sign = if self.amount < 0.0 { "-" } else { "" };
        let abs = self.amount.abs();
        match self.currency {
            Currency::Usd => format!("{sign}{}{abs:.2}", self.currency.symbol()),
            Currency::Ves => format!("{sign}{} {abs:.2}", self.currency.symbol()),
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn usd_and_ves_are_identities_in_their_own_currency() {
        let rate = ExchangeRate::new(40.0);
        assert_eq!(to_usd(12.5, Currency::Usd, rate), 12.5);
        assert_eq!(to_ves(12.5, Currency::Ves, rate), 12.5);
    }

    #[test]
    fn round_trip_returns_the_original_amount() {
        for rate in [0.01, 1.0, 36.5, 40.0, 1234.5678] {
            let rate = ExchangeRate::new(rate);
            for amount in [0.0, 0.01, 1.0, 19.99, 250.0, 1_000_000.0] {
                let ves = to_ves(amount, Currency::Usd, rate);
                let back = to_usd(ves, Currency::Ves, rate);
                assert!(
                    (back - amount).abs() <= EPSILON * amount.max(1.0),
                    "rate {rate:?}, amount {amount}, got {back}"
                );
            }
        }
    }

    #[test]
    fn zero_rate_degrades_to_zero() {
        assert_eq!(to_usd(100.0, Currency::Ves, ExchangeRate::UNSET), 0.0);
        assert_eq!(to_ves(100.0, Currency::Usd, ExchangeRate::UNSET), 0.0);
    }

    #[test]
    fn invalid_rates_are_coerced_to_zero() {
        assert_eq!(ExchangeRate::new(0.0), ExchangeRate::UNSET);
        assert_eq!(ExchangeRate::new(-1.0), ExchangeRate::UNSET);
        assert_eq!(ExchangeRate::new(f64::NAN), ExchangeRate::UNSET);
        assert_eq!(ExchangeRate::new(f64::INFINITY), ExchangeRate::UNSET);
        assert_eq!("".parse::<ExchangeRate>().unwrap(), ExchangeRate::UNSET);
        assert_eq!("36,5".parse::<ExchangeRate>().unwrap().value(), 36.5);
        assert!(!ExchangeRate::UNSET.is_usable());
    }

    #[test]
    fn rate_deserialization_coerces() {
        let rate: ExchangeRate = serde_json::from_str("-3").unwrap();
        assert_eq!(rate, ExchangeRate::UNSET);
        assert_eq!(serde_json::to_string(&ExchangeRate::new(2.5)).unwrap(), "2.5");
    }

    #[test]
    fn format_rounds_to_two_decimals() {
        assert_eq!(Money::usd(20.0).format(), "$20.00");
        assert_eq!(Money::usd(-30.0).format(), "-$30.00");
        assert_eq!(Money::ves(730.0).to_string(), "Bs. 730.00");
        assert_eq!(Money::ves(0.004).format(), "Bs. 0.00");
    }

    #[test]
    fn convert_switches_currency() {
        let rate = ExchangeRate::new(50.0);
        assert_eq!(Money::ves(100.0).convert(Currency::Usd, rate), Money::usd(2.0));
        assert_eq!(Money::usd(2.0).convert(Currency::Ves, rate), Money::ves(100.0));
    }
}
