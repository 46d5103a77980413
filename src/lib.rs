//! Trellis - distributed primitives over partitioned, Raft-replicated logs.
//!
//! Trellis keeps shared objects (atomic values, multi-maps) consistent across
//! a cluster. Each resource is split into one or more partitions; every
//! partition is an independent Raft group whose committed log drives a
//! deterministic state machine. Clients get linearizable operations through
//! asynchronous completion handles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Resource Façades                        │
//! │      AtomicValue (single partition) │ MultiMap (key-sharded)    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │ CompletionHandle
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Partition Coordinators                     │
//! │     driver task per partition │ pending ops │ read-index gate   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Raft per Partition                     │
//! │   Election │ Replication │ Commit │ Snapshots │ Reconfiguration │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Log Storage                           │
//! │              in-memory │ record log + snapshot files            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Per-member runtime hosting partition drivers
//! - [`core::time`] - Logical tick timing
//! - [`core::error`] - Client-visible errors and adapter mapping
//!
//! ## Control
//! - [`control::membership`] - Cluster membership snapshot
//! - [`control::placement`] - Replica placement per partition
//! - [`control::routing`] - Key to partition routing
//!
//! ## Raft
//! - [`raft::node`] - Deterministic consensus replica
//! - [`raft::log`] - In-memory log with snapshot boundary
//! - [`raft::election`], [`raft::quorum`], [`raft::read_index`], [`raft::rpc`]
//!
//! ## Partitions
//! - [`partition::coordinator`] - Raft replica bound to a state machine
//! - [`partition::driver`] - Tokio task per partition
//! - [`partition::transport`] - In-process network between replicas
//!
//! ## Resources
//! - [`resource::atomic_value`], [`resource::multimap`] - State machines
//! - [`resource::facade`] - Client handles
//! - [`resource::completion`] - Completion handles
//!
//! ## Storage
//! - [`storage::memory`] - Shareable in-memory log storage
//! - [`storage::wal`] - Record log and snapshot files
//!
//! ## Adapters and CLI
//! - [`adapters::rest`] - HTTP-style mapping for atomic values
//! - [`cli::commands`] - CLI command implementations
//!
//! # Guarantees
//!
//! - At most one leader per partition per term
//! - Committed entries are applied in index order, exactly once per replica
//! - A completion handle resolves exactly once
//! - Reads are served only after the leader confirms it still leads

// Core infrastructure
pub mod core;

// Membership, placement and routing
pub mod control;

// Consensus
pub mod raft;

// Partition hosting
pub mod partition;

// Replicated resources
pub mod resource;

// Storage layer
pub mod storage;

// Transport adapters
pub mod adapters;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::error::{TrellisError, TrellisResult};
pub use self::core::{config, error, runtime, time};
pub use control::{membership, placement, routing};
pub use resource::{AtomicValue, CompletionHandle, MultiMap, ResourceHandle};
