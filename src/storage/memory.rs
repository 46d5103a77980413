//! In-memory log storage.
//!
//! Clones share the same backing state, so a test can drop a replica and
//! start a new one over the same storage to model a restart.

use super::{HardState, LogStorage, RecoveredState};
use crate::raft::log::{LogEntry, Snapshot};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shareable in-memory storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStorage {
    inner: Arc<Mutex<RecoveredState>>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the persisted state.
    pub fn state(&self) -> RecoveredState {
        self.inner.lock().clone()
    }
}

impl LogStorage for MemoryLogStorage {
    fn recover(&mut self) -> Result<RecoveredState> {
        Ok(self.inner.lock().clone())
    }

    fn save_hard_state(&mut self, state: &HardState) -> Result<()> {
        self.inner.lock().hard_state = state.clone();
        Ok(())
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        self.inner.lock().append(entries);
        Ok(())
    }

    fn truncate_from(&mut self, index: u64) -> Result<()> {
        self.inner.lock().truncate_from(index);
        Ok(())
    }

    fn install_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.inner.lock().install_snapshot(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::log::{EntryPayload, SnapshotMeta};
    use bytes::Bytes;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry::new(index, term, EntryPayload::Noop)
    }

    #[test]
    fn clones_share_state() {
        let mut storage = MemoryLogStorage::new();
        let mut restarted = storage.clone();

        storage.append(&[entry(1, 1), entry(2, 1)]).unwrap();
        storage.append(&[entry(2, 2)]).unwrap();
        storage
            .save_hard_state(&HardState {
                term: 2,
                voted_for: None,
            })
            .unwrap();

        let state = restarted.recover().unwrap();
        assert_eq!(state.hard_state.term, 2);
        assert_eq!(state.entries, vec![entry(1, 1), entry(2, 2)]);
    }

    #[test]
    fn snapshot_drops_covered_entries() {
        let mut storage = MemoryLogStorage::new();
        storage
            .append(&[entry(1, 1), entry(2, 1), entry(3, 1)])
            .unwrap();
        storage
            .install_snapshot(&Snapshot {
                meta: SnapshotMeta {
                    index: 2,
                    term: 1,
                    replicas: Vec::new(),
                },
                data: Bytes::from_static(b"state"),
            })
            .unwrap();
        storage.truncate_from(4).unwrap();

        let state = storage.state();
        assert_eq!(state.entries, vec![entry(3, 1)]);
        assert_eq!(state.snapshot.unwrap().meta.index, 2);
    }
}
