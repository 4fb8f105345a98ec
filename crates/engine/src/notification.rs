//! Single-slot, self-expiring status message.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// How long a notification stays visible.
pub const NOTIFICATION_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub message: String,
    pub kind: NotificationKind,
}

/// Publishes the latest notification and clears it after a fixed interval.
///
/// A newer notification replaces the current one and gets its own full
/// interval; the clear scheduled by the replaced one does nothing.
#[derive(Clone, Debug)]
pub struct Notifier {
    slot: Arc<watch::Sender<Option<Notification>>>,
    latest: Arc<AtomicU64>,
    ttl: Duration,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(NOTIFICATION_TTL)
    }
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            latest: Arc::new(AtomicU64::new(0)),
            ttl,
        }
    }

    /// Shows `message` and schedules its removal. Must run inside a tokio
    /// runtime.
    pub fn notify(&self, message: impl Into<String>, kind: NotificationKind) {
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let notification = Notification {
            message: message.into(),
            kind,
        };
        tracing::debug!(?notification, "notify");
        self.slot.send_replace(Some(notification));

        let slot = self.slot.clone();
        let latest = self.latest.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            slot.send_if_modified(|current| {
                if latest.load(Ordering::SeqCst) == seq && current.is_some() {
                    *current = None;
                    true
                } else {
                    false
                }
            });
        });
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(message, NotificationKind::Success);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(message, NotificationKind::Error);
    }

    pub fn current(&self) -> Option<Notification> {
        self.slot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Notification>> {
        self.slot.subscribe()
    }
}
