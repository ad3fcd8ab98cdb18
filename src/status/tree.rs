//! The revisioned node tree backing [`Status`](super::Status).
//!
//! Every node carries the global revision that was current when it (or an
//! ancestor containing it) was last replaced. Only JSON objects have named
//! children; scalars and arrays are leaves.

use std::collections::BTreeMap;

use serde_json::Value;

use super::path::StatusPath;
use super::StatusError;

#[derive(Debug)]
pub(super) struct Node {
    revision: u64,
    value: NodeValue,
}

#[derive(Debug)]
enum NodeValue {
    Leaf(Value),
    Branch(BTreeMap<String, Node>),
}

impl Node {
    fn from_value(value: &Value, revision: u64) -> Node {
        let value = match value {
            Value::Object(map) => {
                let children = map
                    .iter()
                    .map(|(key, child)| (key.clone(), Node::from_value(child, revision)))
                    .collect();
                NodeValue::Branch(children)
            }
            other => NodeValue::Leaf(other.clone()),
        };

        Node { revision, value }
    }

    /// Deep copy back out to a plain JSON value.
    fn to_value(&self) -> Value {
        match &self.value {
            NodeValue::Leaf(value) => value.clone(),
            NodeValue::Branch(children) => {
                let map = children
                    .iter()
                    .map(|(key, child)| (key.clone(), child.to_value()))
                    .collect();
                Value::Object(map)
            }
        }
    }

    fn children(&self) -> Option<&BTreeMap<String, Node>> {
        match &self.value {
            NodeValue::Branch(children) => Some(children),
            NodeValue::Leaf(_) => None,
        }
    }
}

/// Outcome of a `set` against the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SetOutcome {
    /// The new value equals the stored one; no revision moved.
    Unchanged,
    /// The write happened at this revision.
    Changed(u64),
}

#[derive(Debug)]
pub(super) struct Tree {
    root: Node,
    counter: u64,
}

impl Tree {
    pub fn new(initial: &Value) -> Tree {
        Tree {
            root: Node::from_value(initial, 1),
            counter: 1,
        }
    }

    /// Walks a literal path. `Ok(None)` means a missing child of an existing
    /// branch; traversal through a leaf is a bad path.
    fn node_at(&self, path: &StatusPath) -> Result<Option<&Node>, StatusError> {
        let mut node = &self.root;

        for segment in path.segments() {
            match node.children() {
                Some(children) => match children.get(segment) {
                    Some(child) => node = child,
                    None => return Ok(None),
                },
                None => return Err(StatusError::BadPath(path.to_string())),
            }
        }

        Ok(Some(node))
    }

    pub fn revision(&self, path: &StatusPath) -> Result<u64, StatusError> {
        match self.node_at(path)? {
            Some(node) => Ok(node.revision),
            None => Err(StatusError::UnknownPath(path.to_string())),
        }
    }

    pub fn value_at(&self, path: &StatusPath) -> Result<Option<Value>, StatusError> {
        Ok(self.node_at(path)?.map(Node::to_value))
    }

    /// Revision of the deepest existing node on the literal prefix of
    /// `path`. This is the root of the region a watcher over `path`
    /// observes; baselines compare against it.
    pub fn region_revision(&self, path: &StatusPath) -> u64 {
        let mut node = &self.root;

        for segment in path.literal_prefix() {
            match node.children().and_then(|children| children.get(segment)) {
                Some(child) => node = child,
                None => break,
            }
        }

        node.revision
    }

    /// Expands wildcard segments against the current tree, returning the
    /// matching paths that actually exist, in sorted order.
    ///
    /// Worklist algorithm: each pass either consumes one wildcard (fanning
    /// out over the children of its literal prefix) or tests a fully
    /// literal candidate for existence, so it terminates.
    pub fn expand(&self, path: &StatusPath) -> Vec<StatusPath> {
        let mut work = vec![path.clone()];
        let mut results = Vec::new();

        while let Some(candidate) = work.pop() {
            match candidate.first_wildcard() {
                Some(index) => {
                    let prefix_node = candidate.segments()[..index]
                        .iter()
                        .try_fold(&self.root, |node, segment| {
                            node.children().and_then(|children| children.get(segment))
                        });

                    if let Some(children) = prefix_node.and_then(Node::children) {
                        for key in children.keys() {
                            work.push(candidate.with_segment(index, key));
                        }
                    }
                }
                None => {
                    if let Ok(Some(_)) = self.node_at(&candidate) {
                        results.push(candidate);
                    }
                }
            }
        }

        results.sort_by_cached_key(|p| p.to_string());
        results
    }

    /// Writes `value` at `path`, creating missing intermediate branches.
    ///
    /// When `expected_revision` is given it must equal the revision of the
    /// target or of some ancestor on the root-to-target walk. All checks run
    /// before any mutation, so a failed set leaves the tree untouched.
    pub fn set(
        &mut self,
        path: &StatusPath,
        value: &Value,
        expected_revision: Option<u64>,
    ) -> Result<SetOutcome, StatusError> {
        if path.is_query() {
            return Err(StatusError::BadPath(path.to_string()));
        }

        // Validation walk: collect revisions along the chain and find the
        // current target value without touching the tree.
        let mut chain_revisions = vec![self.root.revision];
        let mut node = Some(&self.root);

        for segment in path.segments() {
            node = match node {
                Some(current) => match current.children() {
                    Some(children) => {
                        let child = children.get(segment);
                        if let Some(child) = child {
                            chain_revisions.push(child.revision);
                        }
                        child
                    }
                    None => return Err(StatusError::BadPath(path.to_string())),
                },
                None => None,
            };
        }

        if let Some(expected) = expected_revision {
            if !chain_revisions.contains(&expected) {
                return Err(StatusError::RevisionMismatch {
                    url: path.to_string(),
                    expected,
                });
            }
        }

        if node.map(Node::to_value).as_ref() == Some(value) {
            return Ok(SetOutcome::Unchanged);
        }

        self.counter += 1;
        let revision = self.counter;

        let mut current = &mut self.root;
        current.revision = revision;

        for segment in path.segments() {
            let children = match &mut current.value {
                NodeValue::Branch(children) => children,
                // Checked above; a leaf here would have been a bad path.
                NodeValue::Leaf(_) => unreachable!("validated traversal hit a leaf"),
            };

            current = children.entry(segment.clone()).or_insert_with(|| Node {
                revision,
                value: NodeValue::Branch(BTreeMap::new()),
            });
            current.revision = revision;
        }

        *current = Node::from_value(value, revision);

        Ok(SetOutcome::Changed(revision))
    }
}
