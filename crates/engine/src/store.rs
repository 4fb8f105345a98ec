//! Local mirror of one remote collection.
//!
//! Writes go straight to the remote store and never touch the local
//! snapshot. The snapshot changes only when the sync session installs a
//! delivery pushed by the remote subscription, so a reader never sees a
//! record the store has not confirmed.

use std::{marker::PhantomData, sync::Arc};

use chrono::Utc;
use tokio::sync::watch;

use crate::{
    LedgerError,
    records::{Draft, LedgerRecord, RecordId, newest_first},
    remote::{CollectionPath, Document, OwnerId, RemoteStore},
};

/// The complete collection as last delivered, newest first.
#[derive(Debug)]
pub struct Snapshot<R> {
    pub records: Arc<[R]>,
    /// Number of deliveries installed since the last reset; `0` means the
    /// collection has not been received yet.
    pub revision: u64,
    /// Bumped whenever the subscription feeding this snapshot is replaced.
    /// Deliveries tagged with an older generation are dropped.
    pub(crate) generation: u64,
}

impl<R> Clone for Snapshot<R> {
    fn clone(&self) -> Self {
        Self {
            records: self.records.clone(),
            revision: self.revision,
            generation: self.generation,
        }
    }
}

impl<R> Default for Snapshot<R> {
    fn default() -> Self {
        Self {
            records: Arc::from(Vec::new()),
            revision: 0,
            generation: 0,
        }
    }
}

impl<R> Snapshot<R> {
    pub fn is_loaded(&self) -> bool {
        self.revision > 0
    }
}

pub struct RecordStore<R, S> {
    remote: Arc<S>,
    owner: watch::Receiver<Option<OwnerId>>,
    snapshot: watch::Sender<Snapshot<R>>,
    _record: PhantomData<fn() -> R>,
}

impl<R, S> RecordStore<R, S>
where
    R: LedgerRecord,
    S: RemoteStore,
{
    pub fn new(remote: Arc<S>, owner: watch::Receiver<Option<OwnerId>>) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::default());
        Self {
            remote,
            owner,
            snapshot,
            _record: PhantomData,
        }
    }

    fn path(&self) -> Result<CollectionPath, LedgerError> {
        let owner = self
            .owner
            .borrow()
            .clone()
            .ok_or(LedgerError::NotSignedIn)?;
        Ok(CollectionPath::new(owner, R::KIND))
    }

    /// Validates `draft` and writes it to the remote collection.
    ///
    /// Resolves once the remote store acknowledged the write. The new record
    /// shows up in the snapshot with the next pushed delivery.
    pub async fn add<D>(&self, draft: D) -> Result<RecordId, LedgerError>
    where
        D: Draft<Record = R>,
    {
        let fields = draft.into_fields(Utc::now())?;
        let path = self.path()?;
        let id = self
            .remote
            .create(&path, fields)
            .await
            .map_err(LedgerError::write)?;
        tracing::debug!(%path, %id, "record created");
        Ok(RecordId::from(id))
    }

    /// Deletes `id` from the remote collection.
    pub async fn remove(&self, id: &RecordId) -> Result<(), LedgerError> {
        let path = self.path()?;
        self.remote
            .delete_by_id(&path, id.as_str())
            .await
            .map_err(LedgerError::write)?;
        tracing::debug!(%path, %id, "record deleted");
        Ok(())
    }

    pub fn current_snapshot(&self) -> Arc<[R]> {
        self.snapshot.borrow().records.clone()
    }

    pub fn snapshot(&self) -> Snapshot<R> {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<R>> {
        self.snapshot.subscribe()
    }

    /// Waits until at least one delivery has been installed.
    pub async fn wait_loaded(&self) {
        let mut rx = self.snapshot.subscribe();
        // The sender lives as long as `self`, so this cannot fail while borrowed.
        let _ = rx.wait_for(Snapshot::is_loaded).await;
    }

    /// Generation a newly opened subscription must tag its deliveries with.
    pub(crate) fn generation(&self) -> u64 {
        self.snapshot.borrow().generation
    }

    /// Replaces the snapshot with a pushed delivery.
    ///
    /// Documents that fail to decode are skipped. A delivery from a
    /// subscription that has since been replaced or torn down (an older
    /// `generation`) is dropped; the check and the write happen under the
    /// channel lock, so it cannot race with [`reset`](Self::reset).
    pub(crate) fn install(&self, generation: u64, documents: Vec<Document>) -> bool {
        let mut records: Vec<R> = documents
            .into_iter()
            .filter_map(|document| {
                let id = document.id.clone();
                match R::from_document(document) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        tracing::warn!(kind = %R::KIND, %id, "skipping malformed document: {err}");
                        None
                    }
                }
            })
            .collect();
        records.sort_by(newest_first);

        let mut revision = None;
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            snapshot.records = Arc::from(records);
            snapshot.revision += 1;
            revision = Some(snapshot.revision);
            true
        });

        match revision {
            Some(revision) => {
                tracing::debug!(kind = %R::KIND, revision, "snapshot installed");
                true
            }
            None => {
                tracing::debug!(kind = %R::KIND, generation, "dropping stale delivery");
                false
            }
        }
    }

    /// Drops the mirrored records, e.g. when the owner goes away, and fences
    /// off every subscription opened before. Returns the new generation.
    pub(crate) fn reset(&self) -> u64 {
        self.advance(true)
    }

    /// Fences off every subscription opened before while keeping the
    /// records. Returns the new generation.
    pub(crate) fn fence(&self) -> u64 {
        self.advance(false)
    }

    fn advance(&self, clear: bool) -> u64 {
        let mut generation = 0;
        self.snapshot.send_modify(|snapshot| {
            if clear {
                snapshot.records = Arc::from(Vec::new());
                snapshot.revision = 0;
            }
            snapshot.generation += 1;
            generation = snapshot.generation;
        });
        generation
    }
}
