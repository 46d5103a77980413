//! Replica placement for resource partitions.
//!
//! Each partition gets an ordered replica list drawn from the membership
//! snapshot. With no replication factor every active member replicates every
//! partition; otherwise replicas rotate across members so partitions spread.

use crate::control::membership::{ClusterMembership, MemberId};
use crate::control::routing::PartitionId;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Placement record for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRecord {
    /// Partition number.
    pub partition: PartitionId,
    /// Ordered replica set.
    pub replicas: Vec<MemberId>,
}

impl PlacementRecord {
    /// Check if a member replicates this partition.
    pub fn is_replica(&self, member: &MemberId) -> bool {
        self.replicas.contains(member)
    }
}

/// Compute placements for `partition_count` partitions.
pub fn place_partitions(
    membership: &ClusterMembership,
    partition_count: u32,
    replication_factor: Option<usize>,
) -> Result<Vec<PlacementRecord>> {
    let candidates = membership.replica_candidates();
    if candidates.is_empty() {
        anyhow::bail!("cluster membership has no active members");
    }
    if partition_count == 0 {
        anyhow::bail!("partition count must be > 0");
    }

    let factor = replication_factor.unwrap_or(candidates.len());
    if factor == 0 || factor > candidates.len() {
        anyhow::bail!(
            "replication factor {} must be between 1 and {} active members",
            factor,
            candidates.len()
        );
    }

    let placements = (0..partition_count)
        .map(|slot| {
            let start = slot as usize % candidates.len();
            let replicas = (0..factor)
                .map(|offset| candidates[(start + offset) % candidates.len()].clone())
                .collect();
            PlacementRecord {
                partition: PartitionId(slot + 1),
                replicas,
            }
        })
        .collect();

    Ok(placements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::membership::ClusterMember;

    fn membership(n: usize) -> ClusterMembership {
        ClusterMembership::new(
            (1..=n)
                .map(|i| ClusterMember::new(format!("n{}", i), format!("127.0.0.1:{}", 7000 + i)))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn full_replication_by_default() {
        let placements = place_partitions(&membership(3), 2, None).unwrap();
        assert_eq!(placements.len(), 2);
        assert_eq!(placements[0].partition, PartitionId(1));
        assert_eq!(placements[0].replicas.len(), 3);
        assert_eq!(placements[1].replicas.len(), 3);
    }

    #[test]
    fn replicas_rotate_with_factor() {
        let placements = place_partitions(&membership(5), 3, Some(3)).unwrap();
        let ids: Vec<Vec<&str>> = placements
            .iter()
            .map(|p| p.replicas.iter().map(|m| m.as_str()).collect())
            .collect();
        assert_eq!(ids[0], vec!["n1", "n2", "n3"]);
        assert_eq!(ids[1], vec!["n2", "n3", "n4"]);
        assert_eq!(ids[2], vec!["n3", "n4", "n5"]);
    }

    #[test]
    fn factor_larger_than_cluster_is_rejected() {
        assert!(place_partitions(&membership(2), 1, Some(3)).is_err());
        assert!(place_partitions(&membership(2), 0, None).is_err());
    }
}
