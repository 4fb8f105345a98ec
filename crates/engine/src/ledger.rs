use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::Deserialize;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    ExchangeRate, ExpenseDraft, ExpenseRecord, LedgerError, RecordId, SaleDraft, SaleRecord,
    notification::{NOTIFICATION_TTL, Notification, Notifier},
    remote::{IdentityProvider, OwnerId, RemoteStore},
    session::{SessionState, SyncSession},
    totals::{Totals, spawn_totals},
};

/// Tunables for a [`Ledger`].
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Initial VES-per-USD rate.
    pub exchange_rate: ExchangeRate,
    pub notification_ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            exchange_rate: ExchangeRate::UNSET,
            notification_ttl_secs: NOTIFICATION_TTL.as_secs(),
        }
    }
}

/// Everything a front end needs: live snapshots, totals, the exchange rate,
/// the add/delete operations and the current notification.
///
/// Every add/delete outcome is also reported as a notification. Snapshots
/// change only through pushes from the remote store.
pub struct Ledger<S, I> {
    session: Arc<SyncSession<S, I>>,
    notifier: Notifier,
    rate: watch::Sender<ExchangeRate>,
    totals: watch::Receiver<Totals>,
    identity_watch: Mutex<Option<JoinHandle<()>>>,
}

impl<S, I> Ledger<S, I>
where
    S: RemoteStore,
    I: IdentityProvider,
{
    /// Builds a ledger. Must be called inside a tokio runtime.
    pub fn new(remote: Arc<S>, identity: Arc<I>, config: LedgerConfig) -> Self {
        let notifier = Notifier::new(Duration::from_secs(config.notification_ttl_secs));
        let session = Arc::new(SyncSession::new(remote, identity, notifier.clone()));
        let (rate, rate_rx) = watch::channel(config.exchange_rate);
        let totals = spawn_totals(session.sales().watch(), session.expenses().watch(), rate_rx);

        Self {
            session,
            notifier,
            rate,
            totals,
            identity_watch: Mutex::new(None),
        }
    }

    /// Starts following identity changes and signs in.
    pub async fn start(&self, token: Option<&str>) -> Result<OwnerId, LedgerError> {
        {
            let mut watch = self
                .identity_watch
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if watch.is_none() {
                *watch = Some(self.session.spawn_identity_watch());
            }
        }
        self.session.authenticate(token).await
    }

    /// Waits for the first delivery of both collections.
    pub async fn wait_synced(&self) {
        self.session.sales().wait_loaded().await;
        self.session.expenses().wait_loaded().await;
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &SyncSession<S, I> {
        &self.session
    }

    pub fn sales_snapshot(&self) -> Arc<[SaleRecord]> {
        self.session.sales().current_snapshot()
    }

    pub fn expenses_snapshot(&self) -> Arc<[ExpenseRecord]> {
        self.session.expenses().current_snapshot()
    }

    /// Totals for the current snapshots and rate.
    pub fn totals(&self) -> Totals {
        Totals::compute(
            &self.sales_snapshot(),
            &self.expenses_snapshot(),
            self.exchange_rate(),
        )
    }

    /// Totals recomputed on every snapshot or rate change.
    pub fn watch_totals(&self) -> watch::Receiver<Totals> {
        self.totals.clone()
    }

    pub fn exchange_rate(&self) -> ExchangeRate {
        *self.rate.borrow()
    }

    pub fn set_exchange_rate(&self, rate: ExchangeRate) {
        tracing::debug!(%rate, "exchange rate updated");
        self.rate.send_replace(rate);
    }

    /// Parses raw user input; invalid input sets the rate to `0`.
    pub fn set_exchange_rate_input(&self, input: &str) -> ExchangeRate {
        let rate = input.parse().unwrap_or(ExchangeRate::UNSET);
        self.set_exchange_rate(rate);
        rate
    }

    pub fn watch_exchange_rate(&self) -> watch::Receiver<ExchangeRate> {
        self.rate.subscribe()
    }

    pub async fn add_sale(&self, draft: SaleDraft) -> Result<RecordId, LedgerError> {
        let result = self.session.sales().add(draft).await;
        self.report(result, "Sale added")
    }

    pub async fn add_expense(&self, draft: ExpenseDraft) -> Result<RecordId, LedgerError> {
        let result = self.session.expenses().add(draft).await;
        self.report(result, "Expense added")
    }

    pub async fn delete_sale(&self, id: &RecordId) -> Result<(), LedgerError> {
        let result = self.session.sales().remove(id).await;
        self.report(result, "Sale deleted")
    }

    pub async fn delete_expense(&self, id: &RecordId) -> Result<(), LedgerError> {
        let result = self.session.expenses().remove(id).await;
        self.report(result, "Expense deleted")
    }

    pub fn notification(&self) -> Option<Notification> {
        self.notifier.current()
    }

    pub fn watch_notification(&self) -> watch::Receiver<Option<Notification>> {
        self.notifier.watch()
    }

    /// Stops following identity changes and tears the session down.
    pub fn shutdown(&self) {
        if let Some(watch) = self
            .identity_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watch.abort();
        }
        self.session.teardown();
    }

    fn report<T>(&self, result: Result<T, LedgerError>, success: &str) -> Result<T, LedgerError> {
        match &result {
            Ok(_) => self.notifier.success(success),
            Err(err) => {
                tracing::error!("{err}");
                self.notifier.error(err.to_string());
            }
        }
        result
    }
}

impl<S, I> Drop for Ledger<S, I> {
    fn drop(&mut self) {
        if let Some(watch) = self
            .identity_watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            watch.abort();
        }
    }
}
