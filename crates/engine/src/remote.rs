//! Capabilities the ledger consumes from the outside world.
//!
//! A [`RemoteStore`] keeps the source of truth for every collection and
//! pushes full snapshots to subscribers. An [`IdentityProvider`] signs the
//! user in and reports identity changes. Both are implemented in-process by
//! [`crate::memory::MemoryRemote`] and over HTTP by the CLI client.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{sync::mpsc, task::AbortHandle};

use crate::{CollectionKind, RemoteError};

/// Opaque key identifying whose records a collection path refers to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one collection: `users/{owner}/{kind}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    pub owner: OwnerId,
    pub kind: CollectionKind,
}

impl CollectionPath {
    pub fn new(owner: OwnerId, kind: CollectionKind) -> Self {
        Self { owner, kind }
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "users/{}/{}", self.owner, self.kind)
    }
}

/// A stored document: server-assigned id plus the record body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Map<String, Value>,
}

/// One push from a live subscription: the whole collection, or an error.
pub type SubscriptionEvent = Result<Vec<Document>, RemoteError>;

/// Cancels a live subscription exactly once.
///
/// Calling [`cancel`](Self::cancel) more than once is a no-op, and dropping
/// the handle cancels it.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle that aborts the task feeding the subscription.
    pub fn from_abort(handle: AbortHandle) -> Self {
        Self::new(move || handle.abort())
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A live subscription: pushed events in delivery order, plus the handle
/// that stops them.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    pub handle: SubscriptionHandle,
}

/// Remote source of truth for the record collections.
pub trait RemoteStore: Send + Sync + 'static {
    /// Opens a live subscription. Every remote mutation of `path` delivers
    /// the complete collection; failures arrive as `Err` events.
    fn subscribe(&self, path: &CollectionPath) -> Subscription;

    /// Writes a new document and resolves with the assigned id once
    /// acknowledged.
    fn create(
        &self,
        path: &CollectionPath,
        data: Map<String, Value>,
    ) -> impl Future<Output = Result<String, RemoteError>> + Send;

    fn delete_by_id(
        &self,
        path: &CollectionPath,
        id: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Signs the user in and publishes the current identity.
pub trait IdentityProvider: Send + Sync + 'static {
    fn sign_in_anonymous(&self) -> impl Future<Output = Result<OwnerId, RemoteError>> + Send;

    fn sign_in_with_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<OwnerId, RemoteError>> + Send;

    /// Current identity, updated on sign-in and external sign-out.
    fn identity_changes(&self) -> tokio::sync::watch::Receiver<Option<OwnerId>>;
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn handle_cancels_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut handle = SubscriptionHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.is_active());
        handle.cancel();
        handle.cancel();
        assert!(!handle.is_active());
        drop(handle);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_an_active_handle_cancels_it() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        drop(SubscriptionHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn path_renders_like_a_document_path() {
        let path = CollectionPath::new(OwnerId::new("u1"), CollectionKind::Expenses);
        assert_eq!(path.to_string(), "users/u1/expenses");
    }
}
