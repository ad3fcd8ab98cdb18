//! One-shot change subscriptions over a region of the status tree.

use std::sync::{Mutex, Weak};

use tokio::sync::oneshot;

use super::StatusInner;

/// How a watcher resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The watched region's revisions changed (or the baseline was already
    /// stale at creation).
    Changed,
    /// The watcher was cancelled before it fired. Normal during shutdown.
    Cancelled,
}

/// Handle for a pending one-shot notification created by
/// [`Status::deferred`](super::Status::deferred).
///
/// Dropping a pending watcher cancels it: the entry leaves the pending set
/// and `wait` observes [`WatchOutcome::Cancelled`]. A watcher fires at most
/// once.
#[derive(Debug)]
pub struct Watcher {
    id: u64,
    rx: oneshot::Receiver<()>,
    inner: Weak<Mutex<StatusInner>>,
}

impl Watcher {
    pub(super) fn new(
        id: u64,
        rx: oneshot::Receiver<()>,
        inner: Weak<Mutex<StatusInner>>,
    ) -> Watcher {
        Watcher { id, rx, inner }
    }

    /// Resolves when the watcher fires or is cancelled.
    pub async fn wait(mut self) -> WatchOutcome {
        match (&mut self.rx).await {
            Ok(()) => WatchOutcome::Changed,
            Err(_) => WatchOutcome::Cancelled,
        }
    }

    /// Cancels the watcher without waiting for it.
    pub fn cancel(self) {
        drop(self);
    }

    /// Detached handle that can cancel this watcher from another task while
    /// `wait` is parked; the waiter then observes
    /// [`WatchOutcome::Cancelled`].
    pub fn cancel_handle(&self) -> WatchCancel {
        WatchCancel {
            id: self.id,
            inner: self.inner.clone(),
        }
    }
}

/// See [`Watcher::cancel_handle`].
#[derive(Debug, Clone)]
pub struct WatchCancel {
    id: u64,
    inner: Weak<Mutex<StatusInner>>,
}

impl WatchCancel {
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap();
            inner.pending.retain(|entry| entry.id != self.id);
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap();
            inner.pending.retain(|entry| entry.id != self.id);
        }
    }
}
