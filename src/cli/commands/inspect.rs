//! Inspect command implementation.

use crate::raft::log::EntryPayload;
use crate::storage::wal::{read_records, WalRecord};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Inspect file-backed logs.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Dump WAL records of partition storage directories or WAL files.
    Wal {
        /// Partition directories or WAL files.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::Wal { paths } => {
            for path in paths {
                let wal = wal_file(&path);
                let records = read_records(&wal)
                    .with_context(|| format!("failed to read WAL {}", wal.display()))?;
                println!("{} ({} records)", wal.display(), records.len());
                for record in &records {
                    println!("  {}", describe_record(record));
                }
            }
        }
    }
    Ok(())
}

/// Partition directories hold their log under `wal/log.wal`.
fn wal_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join("wal").join("log.wal")
    } else {
        path.to_path_buf()
    }
}

/// One-line description of a record.
pub fn describe_record(record: &WalRecord) -> String {
    match record {
        WalRecord::HardState(state) => match state.voted_for {
            Some(ref vote) => format!("hard-state term={} vote={}", state.term, vote),
            None => format!("hard-state term={} vote=-", state.term),
        },
        WalRecord::Entries(entries) => {
            let described: Vec<String> = entries
                .iter()
                .map(|entry| {
                    let payload = match entry.payload {
                        EntryPayload::Noop => "noop".to_string(),
                        EntryPayload::Command(ref command) => {
                            format!("{}[{}B]", command.resource_type, command.data.len())
                        }
                        EntryPayload::Reconfigure { ref replicas } => {
                            let replicas: Vec<&str> = replicas.iter().map(|m| m.as_str()).collect();
                            format!("reconfigure[{}]", replicas.join(","))
                        }
                    };
                    format!("{}@{}:{}", entry.index, entry.term, payload)
                })
                .collect();
            format!("entries {}", described.join(" "))
        }
        WalRecord::Truncate { from } => format!("truncate from={}", from),
        WalRecord::Snapshot(meta) => {
            format!(
                "snapshot index={} term={} replicas={}",
                meta.index,
                meta.term,
                meta.replicas.len()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::membership::MemberId;
    use crate::raft::log::LogEntry;
    use crate::resource::state_machine::{Command, ResourceType};
    use crate::storage::{FileLogStorage, HardState, LogStorage};

    #[test]
    fn describes_records() {
        let record = WalRecord::Entries(vec![
            LogEntry::new(1, 1, EntryPayload::Noop),
            LogEntry::new(
                2,
                1,
                EntryPayload::Command(Command::new(ResourceType::MultiMap, vec![0u8; 3])),
            ),
        ]);
        assert_eq!(describe_record(&record), "entries 1@1:noop 2@1:multi_map[3B]");
        assert_eq!(
            describe_record(&WalRecord::HardState(HardState {
                term: 4,
                voted_for: Some(MemberId::new("b")),
            })),
            "hard-state term=4 vote=b"
        );
        assert_eq!(describe_record(&WalRecord::Truncate { from: 7 }), "truncate from=7");
    }

    #[test]
    fn inspects_partition_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileLogStorage::open(dir.path()).unwrap();
        storage.recover().unwrap();
        storage
            .append(&[LogEntry::new(1, 1, EntryPayload::Noop)])
            .unwrap();

        assert_eq!(wal_file(dir.path()), dir.path().join("wal").join("log.wal"));
        let args = InspectArgs {
            command: InspectCommand::Wal {
                paths: vec![dir.path().to_path_buf()],
            },
        };
        assert!(run_inspect(args).is_ok());
    }
}
