//! The status tree: a versioned hierarchical key/value store addressed by
//! `status://` URLs.
//!
//! Every node carries a monotonically increasing revision stamped from a
//! single tree-global counter. Mutations stamp the whole root-to-target
//! chain (and the replaced subtree), so watching any node's revision is
//! enough to notice changes anywhere underneath it.
//!
//! [`Status`] is a cheap cloneable handle; all state lives behind one lock
//! and every operation completes without suspending, so callers from any
//! task or thread observe mutations atomically.

mod path;
mod tree;
mod watch;


use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

pub use path::{StatusPath, STATUS_PREFIX};
pub use watch::{WatchCancel, WatchOutcome, Watcher};

use tree::{SetOutcome, Tree};

#[derive(Debug, Error)]
pub enum StatusError {
    /// Syntactically invalid URL, or traversal through a non-object value.
    #[error("bad status url '{0}'")]
    BadPath(String),

    /// Legal traversal that found no node.
    #[error("unknown status url '{0}'")]
    UnknownPath(String),

    /// Optimistic-concurrency failure: the caller's expected revision
    /// matched neither the target nor any ancestor.
    #[error("revision mismatch for '{url}': expected {expected}")]
    RevisionMismatch { url: String, expected: u64 },
}

struct PendingWatch {
    id: u64,
    path: StatusPath,
    observed: BTreeMap<String, u64>,
    tx: oneshot::Sender<()>,
}

struct StatusInner {
    tree: Tree,
    pending: Vec<PendingWatch>,
    next_watch_id: u64,
}

impl StatusInner {
    /// The revision map a watcher over `path` observes.
    fn observe(&self, path: &StatusPath) -> BTreeMap<String, u64> {
        self.tree
            .expand(path)
            .into_iter()
            .filter_map(|p| {
                let revision = self.tree.revision(&p).ok()?;
                Some((p.to_string(), revision))
            })
            .collect()
    }

    /// Fires every pending watcher whose observed revisions no longer match.
    ///
    /// Iterates over a snapshot of ids and re-checks membership on each
    /// step, so the pending set may gain or lose entries mid-scan.
    fn fire_changed(&mut self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| entry.id).collect();

        for id in ids {
            let Some(index) = self.pending.iter().position(|entry| entry.id == id) else {
                continue;
            };

            let observed = self.observe(&self.pending[index].path);
            if observed != self.pending[index].observed {
                let entry = self.pending.swap_remove(index);
                let _ = entry.tx.send(());
            }
        }
    }
}

/// Shared handle to the status tree. Clones refer to the same tree.
#[derive(Clone)]
pub struct Status {
    inner: Arc<Mutex<StatusInner>>,
}

impl Status {
    /// An empty tree (`{}` at the root) at revision 1.
    pub fn new() -> Status {
        Status::from_value(Value::Object(Default::default()))
    }

    /// A tree seeded with `initial`, every node at revision 1.
    pub fn from_value(initial: Value) -> Status {
        Status {
            inner: Arc::new(Mutex::new(StatusInner {
                tree: Tree::new(&initial),
                pending: Vec::new(),
                next_watch_id: 0,
            })),
        }
    }

    /// Current revision of the node at `url`.
    pub fn revision(&self, url: &str) -> Result<u64, StatusError> {
        let path = StatusPath::parse(url)?;
        let inner = self.inner.lock().unwrap();
        inner.tree.revision(&path)
    }

    /// Deep copy of the value at `url`; `Null` when the path is unknown.
    pub fn get(&self, url: &str) -> Result<Value, StatusError> {
        self.get_or(url, Value::Null)
    }

    /// Deep copy of the value at `url`, or `default` when the path is
    /// unknown. Traversal through a non-object is still a bad path.
    pub fn get_or(&self, url: &str, default: Value) -> Result<Value, StatusError> {
        let path = StatusPath::parse(url)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.tree.value_at(&path)?.unwrap_or(default))
    }

    /// Expands wildcard segments in `url` and returns the matching URLs
    /// that exist in the tree, sorted.
    pub fn get_matching_urls(&self, url: &str) -> Result<Vec<String>, StatusError> {
        let path = StatusPath::parse(url)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tree
            .expand(&path)
            .into_iter()
            .map(|p| p.to_string())
            .collect())
    }

    /// Revision of the root of the region a watcher over `url` observes:
    /// the deepest existing node on the url's literal prefix. Equal to
    /// `revision(url)` whenever the node exists. This is the baseline
    /// [`deferred`](Status::deferred) compares against.
    pub fn region_revision(&self, url: &str) -> Result<u64, StatusError> {
        let path = StatusPath::parse(url)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.tree.region_revision(&path))
    }

    /// Writes `value` at `url`, creating missing intermediate objects.
    /// Writing the current value back is a no-op that moves no revisions.
    pub fn set(&self, url: &str, value: Value) -> Result<(), StatusError> {
        self.set_with_revision(url, value, None)
    }

    /// Like [`set`](Status::set), but fails with
    /// [`StatusError::RevisionMismatch`] unless `expected_revision` matches
    /// the target or one of its ancestors. On success all pending watchers
    /// over changed regions fire before this returns.
    pub fn set_with_revision(
        &self,
        url: &str,
        value: Value,
        expected_revision: Option<u64>,
    ) -> Result<(), StatusError> {
        let path = StatusPath::parse(url)?;
        let mut inner = self.inner.lock().unwrap();

        match inner.tree.set(&path, &value, expected_revision)? {
            SetOutcome::Unchanged => {}
            SetOutcome::Changed(revision) => {
                log::debug!("status set {} at revision {}", path, revision);
                inner.fire_changed();
            }
        }

        Ok(())
    }

    /// Creates a watcher over the (possibly wildcard) `url`.
    ///
    /// With an `expected_revision` that differs from the current revision of
    /// the watched region's root, the watcher fires immediately; otherwise
    /// it fires on the first mutation that changes any revision among the
    /// URLs the query expands to.
    pub fn deferred(
        &self,
        expected_revision: Option<u64>,
        url: &str,
    ) -> Result<Watcher, StatusError> {
        let path = StatusPath::parse(url)?;
        let mut inner = self.inner.lock().unwrap();

        inner.next_watch_id += 1;
        let id = inner.next_watch_id;
        let (tx, rx) = oneshot::channel();

        let baseline = inner.tree.region_revision(&path);
        let stale = matches!(expected_revision, Some(expected) if expected != baseline);

        if stale {
            let _ = tx.send(());
        } else {
            let observed = inner.observe(&path);
            inner.pending.push(PendingWatch {
                id,
                path,
                observed,
                tx,
            });
        }

        Ok(Watcher::new(id, rx, Arc::downgrade(&self.inner)))
    }

    /// Number of watchers currently pending. Used by shutdown paths and
    /// tests.
    pub fn pending_watchers(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::new()
    }
}
