//! In-memory view of a partition's replicated log.
//!
//! Entries are contiguous from `snapshot_index + 1` to `last_index`. The
//! prefix up to `snapshot_index` has been folded into a state machine
//! snapshot and is only represented by its (index, term) boundary.
//!
//! Committed entries are never rewritten: a follower only truncates at the
//! first index whose term conflicts with the leader's, and Raft guarantees the
//! leader holds every committed entry.

use crate::control::membership::MemberId;
use crate::resource::state_machine::Command;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Election epoch.
pub type Term = u64;

/// Payload of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Appended by every new leader before it serves reads.
    Noop,
    /// Client command for the partition's resource.
    Command(Command),
    /// New replica set for the partition.
    Reconfigure { replicas: Vec<MemberId> },
}

/// A single replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: Term,
    pub payload: EntryPayload,
}

impl LogEntry {
    pub fn new(index: u64, term: Term, payload: EntryPayload) -> Self {
        Self {
            index,
            term,
            payload,
        }
    }
}

/// Boundary and membership captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Last log index folded into the snapshot.
    pub index: u64,
    /// Term of that entry.
    pub term: Term,
    /// Replica set in effect at `index`.
    pub replicas: Vec<MemberId>,
}

/// State machine snapshot plus its log boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Bytes,
}

/// Result of reconciling leader entries into a follower log.
#[derive(Debug, Default)]
pub struct Reconciled {
    /// First index removed because of a term conflict.
    pub truncated_from: Option<u64>,
    /// Entries newly appended (to be persisted).
    pub appended: Vec<LogEntry>,
}

/// In-memory log for one partition replica.
#[derive(Debug, Clone, Default)]
pub struct RaftLog {
    snapshot_index: u64,
    snapshot_term: Term,
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from a recovered snapshot boundary and entry suffix.
    pub fn from_parts(snapshot: Option<&SnapshotMeta>, entries: Vec<LogEntry>) -> Self {
        let (snapshot_index, snapshot_term) = snapshot.map(|m| (m.index, m.term)).unwrap_or((0, 0));
        let entries = entries
            .into_iter()
            .filter(|e| e.index > snapshot_index)
            .collect();
        Self {
            snapshot_index,
            snapshot_term,
            entries,
        }
    }

    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    pub fn snapshot_term(&self) -> Term {
        self.snapshot_term
    }

    /// First index still held as an entry.
    pub fn first_index(&self) -> u64 {
        self.snapshot_index + 1
    }

    pub fn last_index(&self) -> u64 {
        self.snapshot_index + self.entries.len() as u64
    }

    pub fn last_term(&self) -> Term {
        self.entries
            .last()
            .map(|e| e.term)
            .unwrap_or(self.snapshot_term)
    }

    /// Term of the entry at `index`, if known.
    ///
    /// Index 0 has term 0; the snapshot boundary keeps its term.
    pub fn term_at(&self, index: u64) -> Option<Term> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.entry(index).map(|e| e.term)
    }

    pub fn entry(&self, index: u64) -> Option<&LogEntry> {
        if index <= self.snapshot_index {
            return None;
        }
        self.entries.get((index - self.first_index()) as usize)
    }

    /// Clone up to `max` entries starting at `start`.
    pub fn entries_from(&self, start: u64, max: usize) -> Vec<LogEntry> {
        if start <= self.snapshot_index || start > self.last_index() {
            return Vec::new();
        }
        let offset = (start - self.first_index()) as usize;
        self.entries[offset..].iter().take(max).cloned().collect()
    }

    /// Clone entries in `start..=end`.
    pub fn entries_between(&self, start: u64, end: u64) -> Vec<LogEntry> {
        if end < start {
            return Vec::new();
        }
        self.entries_from(start, (end - start + 1) as usize)
    }

    /// Build the entry that would follow the current tail, without adding it.
    pub fn next_entry(&self, term: Term, payload: EntryPayload) -> LogEntry {
        LogEntry::new(self.last_index() + 1, term, payload)
    }

    /// Add an entry built by [`next_entry`](Self::next_entry) once it is durable.
    pub fn push(&mut self, entry: LogEntry) {
        debug_assert_eq!(entry.index, self.last_index() + 1);
        self.entries.push(entry);
    }

    /// Append a new entry at the tail.
    pub fn append(&mut self, term: Term, payload: EntryPayload) -> LogEntry {
        let entry = self.next_entry(term, payload);
        self.push(entry.clone());
        entry
    }

    /// Check whether this log holds an entry matching (index, term).
    pub fn matches(&self, index: u64, term: Term) -> bool {
        self.term_at(index) == Some(term)
    }

    /// Merge entries sent by the leader after a successful `matches` check.
    ///
    /// Entries already present with the same term are kept; the log is
    /// truncated at the first conflicting term and the remainder appended.
    pub fn reconcile(&mut self, entries: Vec<LogEntry>) -> Reconciled {
        let mut result = Reconciled::default();
        let mut iter = entries.into_iter().peekable();

        while let Some(entry) = iter.peek() {
            if entry.index <= self.snapshot_index {
                iter.next();
                continue;
            }
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => {
                    iter.next();
                }
                Some(_) => {
                    let offset = (entry.index - self.first_index()) as usize;
                    self.entries.truncate(offset);
                    result.truncated_from = Some(entry.index);
                    break;
                }
                None => break,
            }
        }

        for entry in iter {
            debug_assert_eq!(entry.index, self.last_index() + 1);
            self.entries.push(entry.clone());
            result.appended.push(entry);
        }
        result
    }

    /// Raft up-to-date check used when granting votes.
    pub fn is_up_to_date(&self, last_index: u64, last_term: Term) -> bool {
        last_term > self.last_term()
            || (last_term == self.last_term() && last_index >= self.last_index())
    }

    /// Drop entries up to and including `index` after a local snapshot.
    pub fn compact(&mut self, index: u64, term: Term) {
        if index <= self.snapshot_index {
            return;
        }
        let drop = (index.min(self.last_index()) - self.snapshot_index) as usize;
        self.entries.drain(..drop);
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// Install a leader snapshot, keeping any suffix that agrees with it.
    pub fn restore_snapshot(&mut self, index: u64, term: Term) {
        if self.matches(index, term) {
            self.compact(index, term);
            return;
        }
        self.entries.clear();
        self.snapshot_index = index;
        self.snapshot_term = term;
    }
}
