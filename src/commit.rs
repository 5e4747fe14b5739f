//! Delayed-commit scheduling.
//!
//! Mutations that resolve to a deferred persistence keep a pending change
//! record per item key. Changes coalesce: a second mutation of the same
//! item before its due-time merges into the existing record, keeping the
//! earliest deadline. A single timer seam drives the table; the embedding
//! runtime schedules a wakeup for the soonest due-time and calls
//! `Db::service` when it fires.

use crate::trigger::Cmd;
use std::collections::HashMap;

/// How a mutation is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Never journaled. Lost at close unless a snapshot of the whole
    /// store happens to capture it.
    InMem,
    /// Journaled (flushed and fsynced) before the call returns.
    Immediate,
    /// Journaled at most this many milliseconds later, coalesced by key.
    Deferred(u64),
}

/// A pending journal write for one item.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub key: String,
    pub model: Option<String>,
    pub cmd: Cmd,
    /// Epoch-ms deadline for the journal write.
    pub due: u64,
    /// Serialized document captured at mutation time. Only removals carry
    /// one; other commands read the item's latest state at commit.
    pub value: Option<String>,
}

/// Pending changes keyed by item key.
#[derive(Debug, Default)]
pub(crate) struct ChangeTable {
    changes: HashMap<String, Change>,
}

impl ChangeTable {
    /// Record a pending change, merging with any existing record for the
    /// same key. The earliest due-time wins; the command is upgraded so a
    /// create followed by a deferred update still journals as create.
    pub fn push(
        &mut self,
        key: &str,
        model: Option<&str>,
        cmd: Cmd,
        due: u64,
        value: Option<String>,
    ) {
        match self.changes.get_mut(key) {
            Some(existing) => {
                existing.due = existing.due.min(due);
                // A removal supersedes whatever was pending.
                if cmd == Cmd::Remove {
                    existing.cmd = Cmd::Remove;
                    existing.value = value;
                }
            }
            None => {
                self.changes.insert(
                    key.to_string(),
                    Change {
                        key: key.to_string(),
                        model: model.map(str::to_string),
                        cmd,
                        due,
                        value,
                    },
                );
            }
        }
    }

    /// Remove and return all changes due at or before `now`.
    pub fn take_due(&mut self, now: u64) -> Vec<Change> {
        let due_keys: Vec<String> = self
            .changes
            .values()
            .filter(|c| c.due <= now)
            .map(|c| c.key.clone())
            .collect();
        let mut due: Vec<Change> = due_keys
            .iter()
            .filter_map(|k| self.changes.remove(k))
            .collect();
        // Commit in key order for a deterministic journal.
        due.sort_by(|a, b| a.key.cmp(&b.key));
        due
    }

    /// Remove and return every pending change, regardless of deadline.
    pub fn take_all(&mut self) -> Vec<Change> {
        self.take_due(u64::MAX)
    }

    /// Drop any pending change for `key`.
    pub fn discard(&mut self, key: &str) -> Option<Change> {
        self.changes.remove(key)
    }

    /// The soonest deadline across all pending changes.
    pub fn next_due(&self) -> Option<u64> {
        self.changes.values().map(|c| c.due).min()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Timer seam for the delayed-commit scheduler.
///
/// The surrounding runtime owns the event loop; the database only reports
/// deadlines. `schedule` re-arms any previous deadline (idempotent) and
/// `cancel` clears it. When the wakeup fires, call [`crate::Db::service`].
pub trait CommitTimer {
    /// Arm (or re-arm) the wakeup for an epoch-ms deadline.
    fn schedule(&mut self, deadline: u64);
    /// Clear any armed wakeup.
    fn cancel(&mut self);
}
