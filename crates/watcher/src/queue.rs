//! Pending action queue
//!
//! Holds at most one pending action per path. A new observation for a path
//! that already has a pending action is folded in with [`merge`], so an add
//! followed by a remove before the next drain cancels out, and a burst of
//! changes collapses into one.

use ahash::AHashMap;
use std::path::{Path, PathBuf};

/// Logical operation to replay against the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Path appeared
    Add,
    /// File content changed
    Change,
    /// Path disappeared
    Remove,
}

/// Fold a newly classified action into the pending one for the same path
///
/// | existing \ new | Add    | Change | Remove |
/// |----------------|--------|--------|--------|
/// | (none)         | Add    | Change | Remove |
/// | Add            | Add    | Add    | (none) |
/// | Change         | Change | Change | Remove |
/// | Remove         | Change | Change | Remove |
pub fn merge(existing: Option<ActionKind>, new: ActionKind) -> Option<ActionKind> {
    use ActionKind::*;

    match (existing, new) {
        (None, kind) => Some(kind),
        (Some(Add), Add | Change) => Some(Add),
        (Some(Add), Remove) => None,
        (Some(Change), Add | Change) => Some(Change),
        (Some(Change), Remove) => Some(Remove),
        (Some(Remove), Add | Change) => Some(Change),
        (Some(Remove), Remove) => Some(Remove),
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: ActionKind,
    seq: u64,
}

/// Ordered map from normalized path to pending action
///
/// Entries keep the position of the first observation that created them;
/// [`EventQueue::take`] returns them in that order.
#[derive(Debug, Default)]
pub struct EventQueue {
    entries: AHashMap<PathBuf, Pending>,
    next_seq: u64,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation for a path
    pub fn push(&mut self, path: PathBuf, kind: ActionKind) {
        let existing = self.entries.get(&path).copied();

        match (existing, merge(existing.map(|p| p.kind), kind)) {
            (Some(pending), Some(merged)) => {
                self.entries.insert(path, Pending { kind: merged, seq: pending.seq });
            }
            (None, Some(merged)) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(path, Pending { kind: merged, seq });
            }
            (_, None) => {
                self.entries.remove(&path);
            }
        }
    }

    /// Put back an action that failed during a drain
    ///
    /// The retried action predates anything observed while the drain ran, so
    /// it is merged as the older of the two. Returns `false` when the merge
    /// cancels the entry.
    pub fn requeue(&mut self, path: PathBuf, kind: ActionKind) -> bool {
        match self.entries.get(&path).copied() {
            Some(pending) => match merge(Some(kind), pending.kind) {
                Some(merged) => {
                    self.entries.insert(path, Pending { kind: merged, seq: pending.seq });
                    true
                }
                None => {
                    self.entries.remove(&path);
                    false
                }
            },
            None => {
                self.push(path, kind);
                true
            }
        }
    }

    /// Pending action for a path
    pub fn get(&self, path: &Path) -> Option<ActionKind> {
        self.entries.get(path).map(|p| p.kind)
    }

    /// Number of pending paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every pending action in insertion order
    pub fn take(&mut self) -> Vec<(PathBuf, ActionKind)> {
        let mut entries: Vec<_> = self.entries.drain().collect();
        entries.sort_by_key(|(_, pending)| pending.seq);
        entries
            .into_iter()
            .map(|(path, pending)| (path, pending.kind))
            .collect()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
