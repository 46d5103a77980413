//! Quorum arithmetic and per-follower replication progress.

use crate::control::membership::MemberId;
use std::collections::BTreeMap;

/// Majority of `replicas`.
pub fn quorum_size(replicas: usize) -> usize {
    replicas / 2 + 1
}

/// Leader-side view of one follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaProgress {
    /// Next index to send.
    pub next_index: u64,
    /// Highest index known to be stored on the follower.
    pub match_index: u64,
    /// Heard from within the current check-quorum window.
    pub recent_active: bool,
}

impl ReplicaProgress {
    pub fn new(next_index: u64) -> Self {
        Self {
            next_index,
            match_index: 0,
            recent_active: false,
        }
    }

    /// Record a successful append up to `index`.
    pub fn advance(&mut self, index: u64) -> bool {
        let updated = index > self.match_index;
        if updated {
            self.match_index = index;
        }
        self.next_index = self.next_index.max(index + 1);
        updated
    }

    /// Step back after a rejected append. Never moves below `match_index + 1`.
    pub fn back_off(&mut self, follower_last_index: u64) {
        let candidate = self
            .next_index
            .saturating_sub(1)
            .min(follower_last_index + 1);
        self.next_index = candidate.max(self.match_index + 1).max(1);
    }
}

/// Replication progress for a leader's partition.
#[derive(Debug, Default)]
pub struct PartitionQuorum {
    progress: BTreeMap<MemberId, ReplicaProgress>,
}

impl PartitionQuorum {
    /// Track every replica except the leader itself.
    pub fn new(replicas: &[MemberId], leader: &MemberId, last_index: u64) -> Self {
        let progress = replicas
            .iter()
            .filter(|r| *r != leader)
            .map(|r| (r.clone(), ReplicaProgress::new(last_index + 1)))
            .collect();
        Self { progress }
    }

    pub fn get(&self, member: &MemberId) -> Option<&ReplicaProgress> {
        self.progress.get(member)
    }

    pub fn get_mut(&mut self, member: &MemberId) -> Option<&mut ReplicaProgress> {
        self.progress.get_mut(member)
    }

    pub fn peers(&self) -> impl Iterator<Item = &MemberId> {
        self.progress.keys()
    }

    /// Reconcile tracked followers with a new replica set.
    pub fn set_replicas(&mut self, replicas: &[MemberId], leader: &MemberId, last_index: u64) {
        self.progress
            .retain(|member, _| replicas.contains(member) && member != leader);
        for replica in replicas {
            if replica != leader && !self.progress.contains_key(replica) {
                self.progress
                    .insert(replica.clone(), ReplicaProgress::new(last_index + 1));
            }
        }
    }

    /// Highest index stored on a majority of `voters`, counting the leader
    /// at `leader_last_index`.
    pub fn quorum_match_index(
        &self,
        voters: &[MemberId],
        leader: &MemberId,
        leader_last_index: u64,
    ) -> u64 {
        let mut matches: Vec<u64> = voters
            .iter()
            .map(|v| {
                if v == leader {
                    leader_last_index
                } else {
                    self.progress.get(v).map(|p| p.match_index).unwrap_or(0)
                }
            })
            .collect();
        if matches.is_empty() {
            return 0;
        }
        matches.sort_unstable_by(|a, b| b.cmp(a));
        matches[quorum_size(voters.len()) - 1]
    }

    /// Whether a majority of `voters` (counting the leader) was recently active.
    pub fn quorum_active(&self, voters: &[MemberId], leader: &MemberId) -> bool {
        let active = voters
            .iter()
            .filter(|v| *v == leader || self.progress.get(*v).is_some_and(|p| p.recent_active))
            .count();
        active >= quorum_size(voters.len())
    }

    /// Clear activity flags for the next check-quorum window.
    pub fn reset_activity(&mut self) {
        for progress in self.progress.values_mut() {
            progress.recent_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<MemberId> {
        names.iter().map(|n| MemberId::new(*n)).collect()
    }

    #[test]
    fn quorum_sizes() {
        assert_eq!(quorum_size(1), 1);
        assert_eq!(quorum_size(2), 2);
        assert_eq!(quorum_size(3), 2);
        assert_eq!(quorum_size(4), 3);
        assert_eq!(quorum_size(5), 3);
    }

    #[test]
    fn quorum_match_index_is_majority_median() {
        let voters = ids(&["a", "b", "c", "d", "e"]);
        let leader = MemberId::new("a");
        let mut quorum = PartitionQuorum::new(&voters, &leader, 10);
        quorum.get_mut(&MemberId::new("b")).unwrap().advance(8);
        quorum.get_mut(&MemberId::new("c")).unwrap().advance(6);
        quorum.get_mut(&MemberId::new("d")).unwrap().advance(3);

        assert_eq!(quorum.quorum_match_index(&voters, &leader, 10), 6);
    }

    #[test]
    fn back_off_respects_follower_tail_and_match() {
        let mut progress = ReplicaProgress::new(10);
        progress.back_off(4);
        assert_eq!(progress.next_index, 5);
        progress.back_off(20);
        assert_eq!(progress.next_index, 4);

        progress.advance(3);
        progress.next_index = 4;
        progress.back_off(0);
        assert_eq!(progress.next_index, 4);
    }

    #[test]
    fn quorum_activity() {
        let voters = ids(&["a", "b", "c"]);
        let leader = MemberId::new("a");
        let mut quorum = PartitionQuorum::new(&voters, &leader, 0);
        assert!(!quorum.quorum_active(&voters, &leader));
        quorum.get_mut(&MemberId::new("c")).unwrap().recent_active = true;
        assert!(quorum.quorum_active(&voters, &leader));
        quorum.reset_activity();
        assert!(!quorum.quorum_active(&voters, &leader));
    }

    #[test]
    fn set_replicas_adds_and_removes_followers() {
        let leader = MemberId::new("a");
        let mut quorum = PartitionQuorum::new(&ids(&["a", "b", "c"]), &leader, 5);
        quorum.set_replicas(&ids(&["a", "b", "d"]), &leader, 7);
        let peers: Vec<&str> = quorum.peers().map(|m| m.as_str()).collect();
        assert_eq!(peers, vec!["b", "d"]);
        assert_eq!(quorum.get(&MemberId::new("d")).unwrap().next_index, 8);
    }
}
