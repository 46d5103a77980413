//! File-backed write-ahead log and snapshot files.
//!
//! Layout under the partition's storage directory:
//!
//! ```text
//! <dir>/wal/log.wal                              record log
//! <dir>/snapshots/snapshot_<index>_<term>.snap   state machine snapshots
//! ```
//!
//! The record log is a sequence of length-prefixed bincode [`WalRecord`]s.
//! Recovery replays the records in order. Installing a snapshot writes the
//! snapshot file first, then rewrites the record log without the covered
//! prefix and atomically renames it into place.

use super::{HardState, LogStorage, RecoveredState};
use crate::raft::log::{LogEntry, Snapshot, SnapshotMeta};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const WAL_FILE: &str = "log.wal";

/// One durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    /// Term and vote.
    HardState(HardState),
    /// Entries replacing anything stored from the first entry's index on.
    Entries(Vec<LogEntry>),
    /// Entries at `from` and above were discarded.
    Truncate { from: u64 },
    /// A snapshot file covering the prefix up to `meta.index` exists.
    Snapshot(SnapshotMeta),
}

impl WalRecord {
    /// Serialize this record to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to serialize WAL record")
    }

    /// Deserialize a record from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("failed to deserialize WAL record")
    }
}

/// Read every record from a WAL file.
pub fn read_records(path: &Path) -> Result<Vec<WalRecord>> {
    let mut records = Vec::new();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
        Err(e) => return Err(e).context("failed to open WAL file"),
    };

    let mut reader = BufReader::new(file);
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read record length"),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut record_buf = vec![0u8; len];
        match reader.read_exact(&mut record_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Torn tail from a crash mid-write; the record was never acknowledged.
                tracing::warn!(path = %path.display(), "discarding torn WAL record");
                break;
            }
            Err(e) => return Err(e).context("failed to read record data"),
        }
        records.push(WalRecord::deserialize(&record_buf)?);
    }

    Ok(records)
}

fn write_record(writer: &mut impl Write, record: &WalRecord) -> Result<()> {
    let bytes = record.serialize()?;
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .context("failed to write record length")?;
    writer
        .write_all(&bytes)
        .context("failed to write record data")?;
    Ok(())
}

/// File-backed log storage for one partition replica.
pub struct FileLogStorage {
    wal_dir: PathBuf,
    snapshot_dir: PathBuf,
    wal: Option<File>,
    /// Mirror of the durable state, used to rewrite the log on compaction.
    state: RecoveredState,
}

impl FileLogStorage {
    /// Open (creating if needed) storage rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let wal_dir = dir.join("wal");
        let snapshot_dir = dir.join("snapshots");
        std::fs::create_dir_all(&wal_dir).context("failed to create WAL directory")?;
        std::fs::create_dir_all(&snapshot_dir).context("failed to create snapshot directory")?;

        Ok(Self {
            wal_dir,
            snapshot_dir,
            wal: None,
            state: RecoveredState::default(),
        })
    }

    /// Path of the record log.
    pub fn wal_path(&self) -> PathBuf {
        self.wal_dir.join(WAL_FILE)
    }

    fn snapshot_path(&self, meta: &SnapshotMeta) -> PathBuf {
        self.snapshot_dir
            .join(format!("snapshot_{:016}_{:016}.snap", meta.index, meta.term))
    }

    fn wal_file(&mut self) -> Result<&mut File> {
        if self.wal.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.wal_path())
                .context("failed to open WAL file")?;
            self.wal = Some(file);
        }
        self.wal
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("WAL file unavailable"))
    }

    fn persist(&mut self, record: &WalRecord) -> Result<()> {
        let file = self.wal_file()?;
        let mut writer = BufWriter::new(&mut *file);
        write_record(&mut writer, record)?;
        writer.flush().context("failed to flush WAL")?;
        drop(writer);
        file.sync_data().context("failed to sync WAL")?;
        Ok(())
    }

    fn load_snapshot(&self, meta: &SnapshotMeta) -> Result<Snapshot> {
        let path = self.snapshot_path(meta);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        bincode::deserialize(&bytes).context("failed to deserialize snapshot")
    }

    /// Rewrite the record log from the in-memory mirror.
    fn rewrite(&mut self) -> Result<()> {
        let tmp_path = self.wal_dir.join(format!("{}.tmp", WAL_FILE));
        {
            let file = File::create(&tmp_path).context("failed to create WAL rewrite file")?;
            let mut writer = BufWriter::new(file);
            write_record(&mut writer, &WalRecord::HardState(self.state.hard_state.clone()))?;
            if let Some(snapshot) = &self.state.snapshot {
                write_record(&mut writer, &WalRecord::Snapshot(snapshot.meta.clone()))?;
            }
            if !self.state.entries.is_empty() {
                write_record(&mut writer, &WalRecord::Entries(self.state.entries.clone()))?;
            }
            writer.flush().context("failed to flush WAL rewrite")?;
            writer
                .get_ref()
                .sync_all()
                .context("failed to sync WAL rewrite")?;
        }

        self.wal = None;
        std::fs::rename(&tmp_path, self.wal_path()).context("failed to replace WAL file")?;
        Ok(())
    }

    /// Delete snapshot files older than `keep_index`.
    fn cleanup_snapshots(&self, keep_index: u64) -> Result<u64> {
        let mut deleted = 0;
        for entry in std::fs::read_dir(&self.snapshot_dir)
            .context("failed to list snapshots")?
            .flatten()
        {
            let path = entry.path();
            let Some(index) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("snapshot_"))
                .and_then(|s| s.split('_').next())
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            if index < keep_index && std::fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

impl LogStorage for FileLogStorage {
    fn recover(&mut self) -> Result<RecoveredState> {
        let mut state = RecoveredState::default();
        for record in read_records(&self.wal_path())? {
            match record {
                WalRecord::HardState(hard_state) => state.hard_state = hard_state,
                WalRecord::Entries(entries) => state.append(&entries),
                WalRecord::Truncate { from } => state.truncate_from(from),
                WalRecord::Snapshot(meta) => {
                    let snapshot = self.load_snapshot(&meta)?;
                    state.install_snapshot(&snapshot);
                }
            }
        }

        tracing::debug!(
            term = state.hard_state.term,
            entries = state.entries.len(),
            snapshot_index = state.snapshot.as_ref().map(|s| s.meta.index).unwrap_or(0),
            "recovered WAL"
        );
        self.state = state.clone();
        // Start from a clean file so a torn tail never precedes new records.
        self.rewrite()?;
        Ok(state)
    }

    fn save_hard_state(&mut self, hard_state: &HardState) -> Result<()> {
        self.persist(&WalRecord::HardState(hard_state.clone()))?;
        self.state.hard_state = hard_state.clone();
        Ok(())
    }

    fn append(&mut self, entries: &[LogEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.persist(&WalRecord::Entries(entries.to_vec()))?;
        self.state.append(entries);
        Ok(())
    }

    fn truncate_from(&mut self, index: u64) -> Result<()> {
        self.persist(&WalRecord::Truncate { from: index })?;
        self.state.truncate_from(index);
        Ok(())
    }

    fn install_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let path = self.snapshot_path(&snapshot.meta);
        let bytes = bincode::serialize(snapshot).context("failed to serialize snapshot")?;
        {
            let file = File::create(&path).context("failed to create snapshot file")?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&bytes).context("failed to write snapshot")?;
            writer.flush().context("failed to flush snapshot")?;
            writer
                .get_ref()
                .sync_all()
                .context("failed to sync snapshot")?;
        }

        self.state.install_snapshot(snapshot);
        self.rewrite()?;
        let deleted = self.cleanup_snapshots(snapshot.meta.index)?;
        tracing::debug!(
            index = snapshot.meta.index,
            term = snapshot.meta.term,
            deleted,
            "installed snapshot"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::log::EntryPayload;
    use bytes::Bytes;

    fn entry(index: u64, term: u64) -> LogEntry {
        LogEntry::new(index, term, EntryPayload::Noop)
    }

    #[test]
    fn recovers_entries_truncations_and_votes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = FileLogStorage::open(dir.path()).unwrap();
            storage.recover().unwrap();
            storage
                .append(&[entry(1, 1), entry(2, 1), entry(3, 1)])
                .unwrap();
            storage.truncate_from(3).unwrap();
            storage.append(&[entry(3, 2)]).unwrap();
            storage
                .save_hard_state(&HardState {
                    term: 2,
                    voted_for: Some("n1".into()),
                })
                .unwrap();
        }

        let mut storage = FileLogStorage::open(dir.path()).unwrap();
        let state = storage.recover().unwrap();
        assert_eq!(state.hard_state.term, 2);
        assert_eq!(state.hard_state.voted_for, Some("n1".into()));
        assert_eq!(state.entries, vec![entry(1, 1), entry(2, 1), entry(3, 2)]);
    }

    #[test]
    fn snapshot_compacts_the_record_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = FileLogStorage::open(dir.path()).unwrap();
            storage.recover().unwrap();
            storage
                .append(&[entry(1, 1), entry(2, 1), entry(3, 1)])
                .unwrap();
            storage
                .install_snapshot(&Snapshot {
                    meta: SnapshotMeta {
                        index: 2,
                        term: 1,
                        replicas: vec!["n1".into()],
                    },
                    data: Bytes::from_static(b"state@2"),
                })
                .unwrap();
            storage.append(&[entry(4, 1)]).unwrap();
        }

        let mut storage = FileLogStorage::open(dir.path()).unwrap();
        let state = storage.recover().unwrap();
        let snapshot = state.snapshot.unwrap();
        assert_eq!(snapshot.meta.index, 2);
        assert_eq!(snapshot.data, Bytes::from_static(b"state@2"));
        assert_eq!(state.entries, vec![entry(3, 1), entry(4, 1)]);

        let records = read_records(&storage.wal_path()).unwrap();
        assert!(matches!(records[0], WalRecord::HardState(_)));
        assert!(matches!(records[1], WalRecord::Snapshot(_)));
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileLogStorage::open(dir.path()).unwrap();
        storage.recover().unwrap();
        storage.append(&[entry(1, 1)]).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(storage.wal_path())
            .unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let mut reopened = FileLogStorage::open(dir.path()).unwrap();
        let state = reopened.recover().unwrap();
        assert_eq!(state.entries, vec![entry(1, 1)]);
    }
}
