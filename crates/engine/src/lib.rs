//! Sales/expense ledger engine.
//!
//! Mirrors two remote collections (sales and expenses) through live
//! subscriptions and derives USD/VES totals under a user supplied exchange
//! rate. See [`Ledger`] for the front-end facing surface.

pub use currency::Currency;
pub use error::{LedgerError, RemoteError};
pub use ledger::{Ledger, LedgerConfig};
pub use money::{ExchangeRate, Money, to_usd, to_ves};
pub use notification::{NOTIFICATION_TTL, Notification, NotificationKind, Notifier};
pub use records::{
    CollectionKind, Draft, ExpenseDraft, ExpenseRecord, LedgerRecord, RecordId, SaleDraft,
    SaleRecord,
};
pub use remote::{
    CollectionPath, Document, IdentityProvider, OwnerId, RemoteStore, Subscription,
    SubscriptionEvent, SubscriptionHandle,
};
pub use session::{SessionState, SyncSession};
pub use store::{RecordStore, Snapshot};
pub use totals::{ProfitStatus, Totals};

mod currency;
mod error;
mod ledger;
pub mod memory;
mod money;
mod notification;
mod records;
mod remote;
mod session;
mod store;
mod totals;
