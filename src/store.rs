//! Room membership store.
//!
//! Holds the last presence snapshot the server sent and publishes it through
//! a [`tokio::sync::watch`] channel. Every update is total: the previous list
//! is replaced, never merged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::protocol::RoomUser;

/// Shared, reactive presence snapshot.
///
/// Cloning the store yields another handle to the same snapshot.
///
/// Once [`close`](Self::close)d the snapshot stays empty for every handle.
#[derive(Debug, Clone)]
pub struct PresenceStore {
    tx: Arc<watch::Sender<Vec<RoomUser>>>,
    closed: Arc<AtomicBool>,
}

impl PresenceStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            tx: Arc::new(tx),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the snapshot with `users`, in the order given.
    ///
    /// Ignored after [`close`](Self::close).
    pub fn replace(&self, users: Vec<RoomUser>) {
        let count = users.len();
        // The flag is read under the watch lock, so a replace racing `close`
        // either lands before the clear or not at all.
        let replaced = self.tx.send_if_modified(|current| {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            *current = users;
            true
        });
        if replaced {
            debug!(count, "store: presence snapshot replaced");
        } else {
            debug!(count, "store: closed, presence snapshot discarded");
        }
    }

    /// Empty the snapshot for good. Later replacements are ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reset to an empty snapshot. Subscribers are only notified when the
    /// snapshot was not already empty.
    pub fn clear(&self) {
        let changed = self.tx.send_if_modified(|users| {
            if users.is_empty() {
                false
            } else {
                users.clear();
                true
            }
        });
        if changed {
            debug!("store: presence snapshot cleared");
        }
    }

    /// A copy of the current snapshot.
    pub fn snapshot(&self) -> Vec<RoomUser> {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot replacements.
    pub fn subscribe(&self) -> watch::Receiver<Vec<RoomUser>> {
        self.tx.subscribe()
    }
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new()
    }
}
