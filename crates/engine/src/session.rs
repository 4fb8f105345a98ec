//! Subscription lifecycle: sign in, subscribe both collections for the
//! current owner, fan pushed snapshots into the record stores, tear down.
//!
//! ```text
//! Unauthenticated -> Authenticating -> Subscribed(owner) -> TornDown
//!        ^                 |
//!        +-- sign-in fails +
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    ExpenseRecord, LedgerError, SaleRecord,
    notification::Notifier,
    records::LedgerRecord,
    remote::{
        CollectionPath, IdentityProvider, OwnerId, RemoteStore, SubscriptionEvent,
        SubscriptionHandle,
    },
    store::RecordStore,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Subscribed(OwnerId),
    TornDown,
}

struct ActiveSubscription {
    path: CollectionPath,
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
}

impl ActiveSubscription {
    fn cancel(mut self) {
        self.handle.cancel();
        self.pump.abort();
        tracing::info!(path = %self.path, "subscription closed");
    }
}

pub struct SyncSession<S, I> {
    remote: Arc<S>,
    identity: Arc<I>,
    sales: Arc<RecordStore<SaleRecord, S>>,
    expenses: Arc<RecordStore<ExpenseRecord, S>>,
    notifier: Notifier,
    owner: watch::Sender<Option<OwnerId>>,
    state: watch::Sender<SessionState>,
    active: Mutex<Vec<ActiveSubscription>>,
}

impl<S, I> SyncSession<S, I>
where
    S: RemoteStore,
    I: IdentityProvider,
{
    pub fn new(remote: Arc<S>, identity: Arc<I>, notifier: Notifier) -> Self {
        let (owner, owner_rx) = watch::channel(None);
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            sales: Arc::new(RecordStore::new(remote.clone(), owner_rx.clone())),
            expenses: Arc::new(RecordStore::new(remote.clone(), owner_rx)),
            remote,
            identity,
            notifier,
            owner,
            state,
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn sales(&self) -> &RecordStore<SaleRecord, S> {
        &self.sales
    }

    pub fn expenses(&self) -> &RecordStore<ExpenseRecord, S> {
        &self.expenses
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner.borrow().clone()
    }

    /// Signs in with `token` when given, anonymously otherwise, and
    /// subscribes both collections for the resulting owner.
    ///
    /// On failure the session goes back to `Unauthenticated`: open
    /// subscriptions are closed, the owner is cleared and an error
    /// notification is shown.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<OwnerId, LedgerError> {
        self.state.send_replace(SessionState::Authenticating);
        let result = match token {
            Some(token) => self.identity.sign_in_with_token(token).await,
            None => self.identity.sign_in_anonymous().await,
        };

        match result {
            Ok(owner) => {
                tracing::info!(%owner, "signed in");
                self.subscribe(owner.clone());
                Ok(owner)
            }
            Err(err) => {
                let err = LedgerError::auth(err);
                tracing::error!("{err}");
                {
                    let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
                    self.close(&mut active);
                    self.state.send_replace(SessionState::Unauthenticated);
                }
                self.notifier.error(err.to_string());
                Err(err)
            }
        }
    }

    /// Opens one subscription per collection for `owner`.
    ///
    /// Does nothing if `owner` is already subscribed. Subscriptions of a
    /// previous owner are closed and its records dropped first. Deliveries
    /// still queued by a closed subscription are never installed.
    pub fn subscribe(&self, owner: OwnerId) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *self.state.borrow() == SessionState::Subscribed(owner.clone()) && !active.is_empty() {
            return;
        }

        for subscription in active.drain(..) {
            subscription.cancel();
        }
        let (sales, expenses) = if self.owner.borrow().as_ref() != Some(&owner) {
            (self.sales.reset(), self.expenses.reset())
        } else {
            (self.sales.fence(), self.expenses.fence())
        };
        self.owner.send_replace(Some(owner.clone()));

        active.push(self.open(&owner, &self.sales, sales));
        active.push(self.open(&owner, &self.expenses, expenses));
        self.state.send_replace(SessionState::Subscribed(owner));
    }

    fn open<R: LedgerRecord>(
        &self,
        owner: &OwnerId,
        store: &Arc<RecordStore<R, S>>,
        generation: u64,
    ) -> ActiveSubscription {
        let path = CollectionPath::new(owner.clone(), R::KIND);
        let subscription = self.remote.subscribe(&path);
        tracing::info!(%path, "subscription opened");
        let pump = spawn_pump(
            path.clone(),
            subscription.events,
            store.clone(),
            generation,
            self.notifier.clone(),
        );
        ActiveSubscription {
            path,
            handle: subscription.handle,
            pump,
        }
    }

    /// Cancels both subscriptions and forgets the owner's records.
    ///
    /// Safe to call repeatedly. Writes still in flight may complete, but
    /// their pushes are never applied.
    pub fn teardown(&self) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        self.close(&mut active);
        if *self.state.borrow() != SessionState::TornDown {
            tracing::info!("session torn down");
            self.state.send_replace(SessionState::TornDown);
        }
    }

    fn close(&self, active: &mut Vec<ActiveSubscription>) {
        for subscription in active.drain(..) {
            subscription.cancel();
        }
        self.owner.send_replace(None);
        self.sales.reset();
        self.expenses.reset();
    }

    /// Follows the identity provider: a new identity is subscribed, a lost
    /// identity tears the session down.
    pub fn spawn_identity_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.identity.identity_changes();
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                match identity {
                    Some(owner) => session.subscribe(owner),
                    None => {
                        tracing::info!("identity lost");
                        session.teardown();
                    }
                }
            }
        })
    }
}

/// Applies pushed deliveries to `store` in arrival order, as long as the
/// store is still at `generation`.
fn spawn_pump<R, S>(
    path: CollectionPath,
    mut events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    store: Arc<RecordStore<R, S>>,
    generation: u64,
    notifier: Notifier,
) -> JoinHandle<()>
where
    R: LedgerRecord,
    S: RemoteStore,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Ok(documents) => {
                    if !store.install(generation, documents) {
                        break;
                    }
                }
                Err(err) => {
                    let err = LedgerError::subscription(err);
                    tracing::error!(%path, "{err}");
                    notifier.error(err.to_string());
                }
            }
        }
        tracing::debug!(%path, "subscription stream ended");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectionKind, RemoteError, memory::MemoryRemote};

    fn session() -> (Arc<MemoryRemote>, SyncSession<MemoryRemote, MemoryRemote>) {
        let remote = Arc::new(MemoryRemote::new());
        let session = SyncSession::new(remote.clone(), remote.clone(), Notifier::default());
        (remote, session)
    }

    #[tokio::test]
    async fn anonymous_sign_in_subscribes_both_collections() {
        let (remote, session) = session();
        assert_eq!(session.state(), SessionState::Unauthenticated);

        let owner = session.authenticate(None).await.unwrap();
        assert_eq!(session.state(), SessionState::Subscribed(owner.clone()));
        for kind in CollectionKind::ALL {
            assert_eq!(
                remote.subscriber_count(&CollectionPath::new(owner.clone(), kind)),
                1
            );
        }
    }

    #[tokio::test]
    async fn failed_sign_in_stays_unauthenticated_and_notifies() {
        let (remote, session) = session();
        remote.fail_next_sign_in(RemoteError::Transport("offline".to_string()));

        let err = session.authenticate(None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Auth(_)));
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.notifier.current().unwrap().message, err.to_string());
    }

    #[tokio::test]
    async fn failed_re_sign_in_closes_the_previous_subscriptions() {
        let (remote, session) = session();
        let owner = session.authenticate(None).await.unwrap();
        session.sales().wait_loaded().await;

        remote.fail_next_sign_in(RemoteError::Transport("offline".to_string()));
        session.authenticate(None).await.unwrap_err();

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert_eq!(session.owner(), None);
        assert!(!session.sales().snapshot().is_loaded());
        for kind in CollectionKind::ALL {
            assert_eq!(
                remote.subscriber_count(&CollectionPath::new(owner.clone(), kind)),
                0
            );
        }
        let draft = crate::SaleDraft {
            date: "2024-01-01".to_string(),
            product: "Widget".to_string(),
            quantity: Some(1.0),
            amount: Some(5.0),
            ..crate::SaleDraft::default()
        };
        assert!(matches!(
            session.sales().add(draft).await,
            Err(LedgerError::NotSignedIn)
        ));
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn subscribing_the_same_owner_twice_keeps_one_subscription() {
        let (remote, session) = session();
        let owner = OwnerId::new("u1");
        session.subscribe(owner.clone());
        session.subscribe(owner.clone());
        let path = CollectionPath::new(owner, CollectionKind::Sales);
        assert_eq!(remote.subscriber_count(&path), 1);
    }

    #[tokio::test]
    async fn teardown_cancels_subscriptions_and_is_idempotent() {
        let (remote, session) = session();
        let owner = OwnerId::new("u1");
        session.subscribe(owner.clone());
        session.sales().wait_loaded().await;

        session.teardown();
        session.teardown();
        assert_eq!(session.state(), SessionState::TornDown);
        assert_eq!(session.owner(), None);
        assert!(!session.sales().snapshot().is_loaded());
        for kind in CollectionKind::ALL {
            assert_eq!(
                remote.subscriber_count(&CollectionPath::new(owner.clone(), kind)),
                0
            );
        }
    }

    #[tokio::test]
    async fn switching_owner_resubscribes() {
        let (remote, session) = session();
        session.subscribe(OwnerId::new("u1"));
        session.subscribe(OwnerId::new("u2"));

        let old = CollectionPath::new(OwnerId::new("u1"), CollectionKind::Expenses);
        let new = CollectionPath::new(OwnerId::new("u2"), CollectionKind::Expenses);
        assert_eq!(remote.subscriber_count(&old), 0);
        assert_eq!(remote.subscriber_count(&new), 1);
        assert_eq!(session.state(), SessionState::Subscribed(OwnerId::new("u2")));
    }
}
