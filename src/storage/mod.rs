//! Durable log storage.
//!
//! A replica persists its hard state (term, vote), log entries and latest
//! snapshot through a [`LogStorage`] before acknowledging anything that
//! depends on them. Storage does not interpret entries; the consensus layer
//! decides what to append, truncate or fold into a snapshot.
//!
//! # Modules
//!
//! - [`memory`] - Shareable in-memory backend (tests, ephemeral clusters)
//! - [`wal`] - File-backed record log with snapshot files

pub mod memory;
pub mod wal;

use crate::control::membership::MemberId;
use crate::raft::log::{LogEntry, Snapshot, Term};
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use memory::MemoryLogStorage;
pub use wal::{FileLogStorage, WalRecord};

/// Vote state that must survive restarts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HardState {
    pub term: Term,
    pub voted_for: Option<MemberId>,
}

/// Everything a replica needs to rebuild its log on startup.
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    pub hard_state: HardState,
    pub snapshot: Option<Snapshot>,
    /// Entries after the snapshot boundary, contiguous.
    pub entries: Vec<LogEntry>,
}

impl RecoveredState {
    fn append(&mut self, entries: &[LogEntry]) {
        if let Some(first) = entries.first() {
            self.entries.retain(|e| e.index < first.index);
        }
        self.entries.extend_from_slice(entries);
    }

    fn truncate_from(&mut self, index: u64) {
        self.entries.retain(|e| e.index < index);
    }

    fn install_snapshot(&mut self, snapshot: &Snapshot) {
        self.entries.retain(|e| e.index > snapshot.meta.index);
        self.snapshot = Some(snapshot.clone());
    }
}

/// Behavioral contract for a replica's durable log.
pub trait LogStorage: Send {
    /// Load persisted state. Called once when the replica starts.
    fn recover(&mut self) -> Result<RecoveredState>;

    /// Persist term and vote.
    fn save_hard_state(&mut self, state: &HardState) -> Result<()>;

    /// Persist entries. The first entry replaces any stored entry at the
    /// same index and everything after it.
    fn append(&mut self, entries: &[LogEntry]) -> Result<()>;

    /// Remove entries at `index` and above.
    fn truncate_from(&mut self, index: u64) -> Result<()>;

    /// Persist a snapshot and drop entries it covers.
    fn install_snapshot(&mut self, snapshot: &Snapshot) -> Result<()>;
}
