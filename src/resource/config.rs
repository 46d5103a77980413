//! Resource configuration and resolution against cluster membership.
//!
//! A [`ResourceConfig`] names a resource and its shape. Resolving it against
//! a membership snapshot fixes the partition count and each partition's
//! replica set, producing an immutable [`CoordinatedResourceConfig`]. Later
//! membership changes do not alter a resolved resource; replica sets change
//! only through committed reconfiguration entries.

use super::state_machine::ResourceType;
use crate::control::membership::{ClusterMembership, MemberId};
use crate::control::placement::place_partitions;
use crate::control::routing::{PartitionId, PartitionKey};
use crate::core::time::TimingConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default client operation timeout.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Declared shape of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    pub name: String,
    pub resource_type: ResourceType,
    /// Fixed for the resource's lifetime. Unsharded types use exactly one.
    pub partitions: u32,
    /// Replicas per partition; every active member when `None`.
    pub replication_factor: Option<usize>,
    pub timing: TimingConfig,
    pub operation_timeout: Duration,
}

impl ResourceConfig {
    /// Validated constructor with default timing and a single partition.
    pub fn new(name: impl Into<String>, resource_type: ResourceType) -> Result<Self> {
        let config = Self {
            name: name.into(),
            resource_type,
            partitions: 1,
            replication_factor: None,
            timing: TimingConfig::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("resource name cannot be empty");
        }
        if self.name.contains('/') {
            anyhow::bail!("resource name '{}' cannot contain '/'", self.name);
        }
        if self.partitions == 0 {
            anyhow::bail!("resource '{}' must have at least one partition", self.name);
        }
        if !self.resource_type.is_sharded() && self.partitions != 1 {
            anyhow::bail!(
                "resource '{}' of type {} is unsharded and must have exactly one partition",
                self.name,
                self.resource_type
            );
        }
        if self.replication_factor == Some(0) {
            anyhow::bail!("resource '{}' replication factor must be > 0", self.name);
        }
        if self.operation_timeout.is_zero() {
            anyhow::bail!("resource '{}' operation timeout must be > 0", self.name);
        }
        self.timing
            .validate()
            .with_context(|| format!("invalid timing for resource '{}'", self.name))
    }

    /// Fix partitions and replica sets against a membership snapshot.
    pub fn resolve(&self, membership: &ClusterMembership) -> Result<CoordinatedResourceConfig> {
        self.validate()?;
        let placements = place_partitions(membership, self.partitions, self.replication_factor)
            .with_context(|| format!("failed to place resource '{}'", self.name))?;
        let partitions = placements
            .into_iter()
            .map(|placement| PartitionConfig {
                partition: placement.partition,
                replicas: placement.replicas,
                timing: self.timing,
            })
            .collect();
        Ok(CoordinatedResourceConfig {
            name: self.name.clone(),
            resource_type: self.resource_type,
            partitions,
            operation_timeout: self.operation_timeout,
        })
    }
}

/// One partition of a resolved resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub partition: PartitionId,
    /// Ordered replica set.
    pub replicas: Vec<MemberId>,
    pub timing: TimingConfig,
}

/// A resource bound to concrete partitions and replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatedResourceConfig {
    pub name: String,
    pub resource_type: ResourceType,
    /// Ordered by partition number; routing slot `i` is `partitions[i]`.
    pub partitions: Vec<PartitionConfig>,
    pub operation_timeout: Duration,
}

impl CoordinatedResourceConfig {
    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn partition_key(&self, partition: PartitionId) -> PartitionKey {
        PartitionKey::new(self.name.clone(), partition)
    }

    /// Partitions that `member` replicates.
    pub fn hosted_by<'a>(
        &'a self,
        member: &'a MemberId,
    ) -> impl Iterator<Item = &'a PartitionConfig> {
        self.partitions
            .iter()
            .filter(move |p| p.replicas.contains(member))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::membership::ClusterMember;

    fn membership() -> ClusterMembership {
        ClusterMembership::new(vec![
            ClusterMember::new("a", "10.0.0.1:7000"),
            ClusterMember::new("b", "10.0.0.2:7000"),
            ClusterMember::new("c", "10.0.0.3:7000"),
        ])
        .unwrap()
    }

    #[test]
    fn atomic_value_resolves_to_one_partition_on_every_member() {
        let config = ResourceConfig::new("counter", ResourceType::AtomicValue).unwrap();
        let resolved = config.resolve(&membership()).unwrap();
        assert_eq!(resolved.partition_count(), 1);
        assert_eq!(resolved.partitions[0].partition, PartitionId(1));
        assert_eq!(resolved.partitions[0].replicas.len(), 3);
    }

    #[test]
    fn unsharded_types_reject_multiple_partitions() {
        let config = ResourceConfig {
            partitions: 4,
            ..ResourceConfig::new("counter", ResourceType::AtomicValue).unwrap()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn multimap_places_partitions_with_replication_factor() {
        let config = ResourceConfig {
            partitions: 3,
            replication_factor: Some(2),
            ..ResourceConfig::new("index", ResourceType::MultiMap).unwrap()
        };
        let resolved = config.resolve(&membership()).unwrap();
        assert_eq!(resolved.partition_count(), 3);
        assert!(resolved.partitions.iter().all(|p| p.replicas.len() == 2));

        let a = MemberId::new("a");
        assert_eq!(resolved.hosted_by(&a).count(), 2);
        assert_eq!(
            resolved.partition_key(PartitionId(2)).to_string(),
            "index/p2"
        );
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(ResourceConfig::new("", ResourceType::MultiMap).is_err());
        assert!(ResourceConfig::new("a/b", ResourceType::MultiMap).is_err());

        let config = ResourceConfig {
            replication_factor: Some(5),
            ..ResourceConfig::new("index", ResourceType::MultiMap).unwrap()
        };
        assert!(config.resolve(&membership()).is_err());

        let config = ResourceConfig {
            timing: TimingConfig {
                election_timeout_ms: 100,
                heartbeat_interval_ms: 50,
            },
            ..ResourceConfig::new("index", ResourceType::MultiMap).unwrap()
        };
        assert!(config.validate().is_err());
    }
}
