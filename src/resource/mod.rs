//! Replicated resources.
//!
//! - [`state_machine`] - Deterministic state machine contract and payload codec
//! - [`atomic_value`] - Single versioned value with compare-and-set
//! - [`multimap`] - Key to value-set map
//! - [`registry`] - Resource type to state machine constructor
//! - [`config`] - Resource declaration and resolution against membership
//! - [`completion`] - Futures resolving submitted operations
//! - [`facade`] - Client handles routing operations to partitions

pub mod atomic_value;
pub mod completion;
pub mod config;
pub mod facade;
pub mod multimap;
pub mod registry;
pub mod state_machine;

pub use completion::CompletionHandle;
pub use config::{CoordinatedResourceConfig, PartitionConfig, ResourceConfig};
pub use facade::{AtomicValue, MultiMap, PartitionRoute, ResourceHandle};
pub use registry::ResourceRegistry;
pub use state_machine::{Command, ResourceStateMachine, ResourceType};
