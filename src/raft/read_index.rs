//! Read-index bookkeeping for linearizable reads on the leader.
//!
//! A read is registered with the commit index at the time it arrives and a
//! caller-chosen context. The leader then tags heartbeats with the highest
//! outstanding context; once a majority echoes a context, every read with a
//! context at or below it is confirmed. A confirmed read becomes ready when it
//! has an index, which is only assigned after the leader commits an entry of
//! its own term.

use super::quorum::quorum_size;
use crate::control::membership::MemberId;
use std::collections::{HashSet, VecDeque};

/// A confirmed read: serve it once the state machine has applied `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadState {
    pub ctx: u64,
    pub index: u64,
}

#[derive(Debug)]
struct PendingRead {
    ctx: u64,
    index: Option<u64>,
    acks: HashSet<MemberId>,
    confirmed: bool,
}

#[derive(Debug, Default)]
pub struct ReadTracker {
    pending: VecDeque<PendingRead>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Register a read. `index` is `None` until the leader has committed in its term.
    pub fn push(&mut self, ctx: u64, index: Option<u64>, leader: &MemberId, voters: &[MemberId]) {
        let mut acks = HashSet::new();
        acks.insert(leader.clone());
        let confirmed = acks.len() >= quorum_size(voters.len());
        self.pending.push_back(PendingRead {
            ctx,
            index,
            acks,
            confirmed,
        });
    }

    /// Highest context still awaiting confirmation.
    pub fn latest_context(&self) -> Option<u64> {
        self.pending
            .iter()
            .rev()
            .find(|r| !r.confirmed)
            .map(|r| r.ctx)
    }

    /// Record that `from` acknowledged leadership for contexts up to `ctx`.
    pub fn ack(&mut self, from: &MemberId, ctx: u64, voters: &[MemberId]) {
        if !voters.contains(from) {
            return;
        }
        let quorum = quorum_size(voters.len());
        for read in self.pending.iter_mut().filter(|r| r.ctx <= ctx) {
            if read.confirmed {
                continue;
            }
            read.acks.insert(from.clone());
            let votes = read.acks.iter().filter(|m| voters.contains(m)).count();
            read.confirmed = votes >= quorum;
        }
    }

    /// Assign `commit_index` to reads registered before the term's first commit.
    pub fn assign_index(&mut self, commit_index: u64) {
        for read in self.pending.iter_mut() {
            if read.index.is_none() {
                read.index = Some(commit_index);
            }
        }
    }

    /// Release confirmed reads in arrival order.
    pub fn take_ready(&mut self) -> Vec<ReadState> {
        let mut ready = Vec::new();
        while let Some(front) = self.pending.front() {
            let (true, Some(index)) = (front.confirmed, front.index) else {
                break;
            };
            ready.push(ReadState {
                ctx: front.ctx,
                index,
            });
            self.pending.pop_front();
        }
        ready
    }

    /// Drop every outstanding read, returning their contexts.
    pub fn abort_all(&mut self) -> Vec<u64> {
        self.pending.drain(..).map(|r| r.ctx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<MemberId> {
        names.iter().map(|n| MemberId::new(*n)).collect()
    }

    #[test]
    fn single_voter_confirms_immediately() {
        let voters = ids(&["a"]);
        let mut reads = ReadTracker::new();
        reads.push(1, Some(4), &MemberId::new("a"), &voters);
        assert_eq!(reads.latest_context(), None);
        assert_eq!(reads.take_ready(), vec![ReadState { ctx: 1, index: 4 }]);
    }

    #[test]
    fn majority_ack_confirms_earlier_contexts() {
        let voters = ids(&["a", "b", "c"]);
        let leader = MemberId::new("a");
        let mut reads = ReadTracker::new();
        reads.push(1, Some(3), &leader, &voters);
        reads.push(2, Some(5), &leader, &voters);
        assert_eq!(reads.latest_context(), Some(2));
        assert!(reads.take_ready().is_empty());

        reads.ack(&MemberId::new("b"), 2, &voters);
        let ready = reads.take_ready();
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].ctx, 1);
        assert_eq!(ready[1].index, 5);
        assert!(reads.is_empty());
    }

    #[test]
    fn acks_from_non_voters_are_ignored() {
        let voters = ids(&["a", "b", "c"]);
        let mut reads = ReadTracker::new();
        reads.push(7, Some(1), &MemberId::new("a"), &voters);
        reads.ack(&MemberId::new("z"), 7, &voters);
        assert!(reads.take_ready().is_empty());
    }

    #[test]
    fn reads_wait_for_index_assignment() {
        let voters = ids(&["a", "b", "c"]);
        let mut reads = ReadTracker::new();
        reads.push(1, None, &MemberId::new("a"), &voters);
        reads.ack(&MemberId::new("c"), 1, &voters);
        assert!(reads.take_ready().is_empty());

        reads.assign_index(9);
        assert_eq!(reads.take_ready(), vec![ReadState { ctx: 1, index: 9 }]);
    }

    #[test]
    fn abort_returns_outstanding_contexts() {
        let voters = ids(&["a", "b", "c"]);
        let mut reads = ReadTracker::new();
        reads.push(1, Some(1), &MemberId::new("a"), &voters);
        reads.push(2, None, &MemberId::new("a"), &voters);
        assert_eq!(reads.abort_all(), vec![1, 2]);
        assert!(reads.is_empty());
    }
}
