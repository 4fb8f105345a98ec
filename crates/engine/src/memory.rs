//! In-process remote store and identity provider.
//!
//! Behaves like a document store with live queries: every mutation of a
//! collection pushes the complete collection to its subscribers. Faults can
//! be injected to exercise the error paths.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::{
    RemoteError,
    remote::{
        CollectionPath, Document, IdentityProvider, OwnerId, RemoteStore, Subscription,
        SubscriptionEvent, SubscriptionHandle,
    },
};

#[derive(Default)]
struct Inner {
    collections: HashMap<CollectionPath, Vec<Document>>,
    subscribers: HashMap<CollectionPath, Vec<(u64, mpsc::UnboundedSender<SubscriptionEvent>)>>,
    next_subscriber: u64,
    tokens: HashMap<String, OwnerId>,
    writes: usize,
    fail_next_write: Option<RemoteError>,
    fail_next_sign_in: Option<RemoteError>,
}

impl Inner {
    fn publish(&mut self, path: &CollectionPath) {
        let documents = self.collections.get(path).cloned().unwrap_or_default();
        if let Some(subscribers) = self.subscribers.get_mut(path) {
            subscribers.retain(|(_, tx)| tx.send(Ok(documents.clone())).is_ok());
        }
    }
}

#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
    identity: Arc<watch::Sender<Option<OwnerId>>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            identity: Arc::new(identity),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `token` as a credential for `owner`.
    pub fn issue_token(&self, token: &str, owner: OwnerId) {
        self.lock().tokens.insert(token.to_string(), owner);
    }

    /// Number of create/delete calls that reached the store.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Makes the next create/delete fail with `err`.
    pub fn fail_next_write(&self, err: RemoteError) {
        self.lock().fail_next_write = Some(err);
    }

    /// Makes the next sign-in fail with `err`.
    pub fn fail_next_sign_in(&self, err: RemoteError) {
        self.lock().fail_next_sign_in = Some(err);
    }

    /// Simulates an external sign-out.
    pub fn sign_out(&self) {
        self.identity.send_replace(None);
    }

    /// Pushes an error to every subscriber of `path`.
    pub fn push_error(&self, path: &CollectionPath, err: RemoteError) {
        let mut inner = self.lock();
        if let Some(subscribers) = inner.subscribers.get_mut(path) {
            subscribers.retain(|(_, tx)| tx.send(Err(err.clone())).is_ok());
        }
    }

    /// Stores a document as-is, bypassing the write counter, and publishes
    /// the collection.
    pub fn insert_document(&self, path: &CollectionPath, document: Document) {
        let mut inner = self.lock();
        inner
            .collections
            .entry(path.clone())
            .or_default()
            .push(document);
        inner.publish(path);
    }

    pub fn documents(&self, path: &CollectionPath) -> Vec<Document> {
        self.lock().collections.get(path).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, path: &CollectionPath) -> usize {
        self.lock()
            .subscribers
            .get(path)
            .map(|subscribers| subscribers.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn begin_write(&self) -> Result<MutexGuard<'_, Inner>, RemoteError> {
        let mut inner = self.lock();
        inner.writes += 1;
        match inner.fail_next_write.take() {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }

    fn sign_in(&self, resolve: impl FnOnce(&Inner) -> Result<OwnerId, RemoteError>) -> Result<OwnerId, RemoteError> {
        let owner = {
            let mut inner = self.lock();
            if let Some(err) = inner.fail_next_sign_in.take() {
                return Err(err);
            }
            resolve(&inner)?
        };
        self.identity.send_replace(Some(owner.clone()));
        Ok(owner)
    }
}

impl RemoteStore for MemoryRemote {
    fn subscribe(&self, path: &CollectionPath) -> Subscription {
        let (tx, events) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.lock();
            let id = inner.next_subscriber;
            inner.next_subscriber += 1;
            let documents = inner.collections.get(path).cloned().unwrap_or_default();
            let _ = tx.send(Ok(documents));
            inner
                .subscribers
                .entry(path.clone())
                .or_default()
                .push((id, tx));
            id
        };

        let inner = self.inner.clone();
        let path = path.clone();
        let handle = SubscriptionHandle::new(move || {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(subscribers) = inner.subscribers.get_mut(&path) {
                subscribers.retain(|(subscriber, _)| *subscriber != id);
            }
        });

        Subscription { events, handle }
    }

    async fn create(
        &self,
        path: &CollectionPath,
        data: Map<String, Value>,
    ) -> Result<String, RemoteError> {
        let mut inner = self.begin_write()?;
        let id = Uuid::new_v4().to_string();
        inner
            .collections
            .entry(path.clone())
            .or_default()
            .push(Document {
                id: id.clone(),
                data,
            });
        inner.publish(path);
        Ok(id)
    }

    async fn delete_by_id(&self, path: &CollectionPath, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.begin_write()?;
        let documents = inner.collections.entry(path.clone()).or_default();
        let before = documents.len();
        documents.retain(|document| document.id != id);
        if documents.len() == before {
            return Err(RemoteError::NotFound(id.to_string()));
        }
        inner.publish(path);
        Ok(())
    }
}

impl IdentityProvider for MemoryRemote {
    async fn sign_in_anonymous(&self) -> Result<OwnerId, RemoteError> {
        self.sign_in(|_| Ok(OwnerId::new(Uuid::new_v4().to_string())))
    }

    async fn sign_in_with_token(&self, token: &str) -> Result<OwnerId, RemoteError> {
        self.sign_in(|inner| inner.tokens.get(token).cloned().ok_or(RemoteError::Unauthorized))
    }

    fn identity_changes(&self) -> watch::Receiver<Option<OwnerId>> {
        self.identity.subscribe()
    }
}
