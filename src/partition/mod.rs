//! Partition hosting.
//!
//! - [`coordinator`] - Binds a Raft replica to a resource state machine
//! - [`driver`] - Tokio task that serializes all work for one partition
//! - [`transport`] - Message delivery between replicas

pub mod coordinator;
pub mod driver;
pub mod transport;

pub use coordinator::PartitionCoordinator;
pub use driver::{spawn_partition, PartitionEvent, PartitionHandle};
pub use transport::{InMemoryNetwork, NetworkStats, Transport};
