//! Cluster membership snapshot.
//!
//! Membership is owned by the embedding process and handed to the core as
//! an immutable snapshot when a resource is resolved. Later membership
//! changes only reach a partition through a committed reconfiguration entry.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Role hint advertised by a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Eligible to host partition replicas.
    #[default]
    Active,
    /// Known to the cluster but never assigned replicas.
    Passive,
}

/// A known cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    /// Member identity.
    pub id: MemberId,
    /// Network address (informational for the in-process transport).
    pub address: String,
    /// Role hint.
    #[serde(default)]
    pub role: MemberRole,
}

impl ClusterMember {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: MemberId::new(id),
            address: address.into(),
            role: MemberRole::Active,
        }
    }

    pub fn passive(mut self) -> Self {
        self.role = MemberRole::Passive;
        self
    }
}

/// Immutable membership snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterMembership {
    members: Vec<ClusterMember>,
}

impl ClusterMembership {
    /// Create a membership snapshot, rejecting duplicate identities.
    pub fn new(members: Vec<ClusterMember>) -> Result<Self> {
        let mut seen = HashSet::new();
        for member in &members {
            if !seen.insert(member.id.clone()) {
                anyhow::bail!("duplicate cluster member: {}", member.id);
            }
        }
        Ok(Self { members })
    }

    /// All members in declaration order.
    pub fn members(&self) -> &[ClusterMember] {
        &self.members
    }

    /// Members eligible to host replicas, in declaration order.
    pub fn replica_candidates(&self) -> Vec<MemberId> {
        self.members
            .iter()
            .filter(|m| m.role == MemberRole::Active)
            .map(|m| m.id.clone())
            .collect()
    }

    /// Look up a member by id.
    pub fn get(&self, id: &MemberId) -> Option<&ClusterMember> {
        self.members.iter().find(|m| &m.id == id)
    }

    /// Address of a member, if known.
    pub fn address_of(&self, id: &MemberId) -> Option<&str> {
        self.get(id).map(|m| m.address.as_str())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_members() {
        let result = ClusterMembership::new(vec![
            ClusterMember::new("n1", "127.0.0.1:7001"),
            ClusterMember::new("n1", "127.0.0.1:7002"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn passive_members_are_not_replica_candidates() {
        let membership = ClusterMembership::new(vec![
            ClusterMember::new("n1", "127.0.0.1:7001"),
            ClusterMember::new("n2", "127.0.0.1:7002").passive(),
            ClusterMember::new("n3", "127.0.0.1:7003"),
        ])
        .unwrap();

        assert_eq!(
            membership.replica_candidates(),
            vec![MemberId::new("n1"), MemberId::new("n3")]
        );
        assert_eq!(
            membership.address_of(&MemberId::new("n2")),
            Some("127.0.0.1:7002")
        );
    }
}
