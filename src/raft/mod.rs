//! Per-partition consensus.
//!
//! Every partition of every resource runs its own Raft group over the
//! partition's replicas:
//! - [`log`] - Replicated log, entries and snapshots
//! - [`rpc`] - Messages exchanged between replicas
//! - [`election`] - Roles, randomized election timers and vote counting
//! - [`quorum`] - Majority arithmetic and follower progress
//! - [`read_index`] - Leadership confirmation for linearizable reads
//! - [`node`] - The replica state machine tying the above together
//!
//! # Safety
//!
//! A leader commits only entries of its own term once a majority stores
//! them, and a replica votes only for candidates whose log is at least as
//! up to date as its own. Together these keep every committed entry in the
//! log of every future leader.

pub mod election;
pub mod log;
pub mod node;
pub mod quorum;
pub mod read_index;
pub mod rpc;

pub use election::Role;
pub use log::{EntryPayload, LogEntry, Snapshot, SnapshotMeta, Term};
pub use node::{NodeConfig, NodeStatus, RaftNode};
pub use rpc::{Envelope, RaftMessage};
