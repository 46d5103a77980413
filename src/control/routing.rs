//! Key routing across a resource's partitions.
//!
//! Keys are routed with a seeded hash that is fixed for the resource's lifetime:
//! `partition = hash64(resource_name, key_bytes) % partition_count`
//!
//! The partition count is fixed when the resource is resolved, so a key
//! always lands on the same partition.

use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Hash seed for key routing. Changing it remaps every key.
const ROUTING_HASH_SEED: u64 = 0x7472_656c_6c69_7331;

/// Partition number within a resource (1-based, as resolved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl std::fmt::Display for PartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A partition scoped to its resource, unique across a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub resource: String,
    pub partition: PartitionId,
}

impl PartitionKey {
    pub fn new(resource: impl Into<String>, partition: PartitionId) -> Self {
        Self {
            resource: resource.into(),
            partition,
        }
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource, self.partition)
    }
}

/// Routes keys to partition slots for one resource.
#[derive(Debug, Clone)]
pub struct PartitionRouter {
    resource: String,
    partition_count: u32,
}

impl PartitionRouter {
    pub fn new(resource: impl Into<String>, partition_count: u32) -> Self {
        Self {
            resource: resource.into(),
            partition_count: partition_count.max(1),
        }
    }

    /// Number of partitions keys are spread across.
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Route a key to its slot in `0..partition_count`.
    pub fn route_key(&self, key: &[u8]) -> usize {
        if self.partition_count == 1 {
            return 0;
        }
        let mut hasher = XxHash64::with_seed(ROUTING_HASH_SEED);
        hasher.write(self.resource.as_bytes());
        hasher.write(key);
        (hasher.finish() % u64::from(self.partition_count)) as usize
    }
}
