//! Election roles, randomized timers and vote counting.

use super::quorum::quorum_size;
use crate::control::membership::MemberId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Role of a replica within its partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "follower"),
            Self::Candidate => write!(f, "candidate"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

/// Election timer with a per-round randomized deadline.
///
/// Each reset draws a fresh timeout in `[base, 2 * base)` ticks so that
/// replicas rarely time out together and split the vote.
#[derive(Debug)]
pub struct ElectionTimer {
    base_ticks: u32,
    timeout_ticks: u32,
    elapsed: u32,
    rng: StdRng,
}

impl ElectionTimer {
    pub fn new(base_ticks: u32, seed: u64) -> Self {
        let mut timer = Self {
            base_ticks: base_ticks.max(1),
            timeout_ticks: base_ticks.max(1),
            elapsed: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        timer.reset();
        timer
    }

    /// Restart the countdown with a new randomized deadline.
    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.timeout_ticks = self.rng.gen_range(self.base_ticks..self.base_ticks * 2);
    }

    /// Advance one tick; returns true once the deadline has passed.
    pub fn tick(&mut self) -> bool {
        self.elapsed = self.elapsed.saturating_add(1);
        self.elapsed >= self.timeout_ticks
    }

    pub fn base_ticks(&self) -> u32 {
        self.base_ticks
    }

    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    pub fn elapsed(&self) -> u32 {
        self.elapsed
    }
}

/// Outcome of a vote tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteResult {
    Won,
    Lost,
    Pending,
}

/// Votes collected by a candidate in one term.
#[derive(Debug, Default)]
pub struct VoteTracker {
    granted: HashSet<MemberId>,
    rejected: HashSet<MemberId>,
}

impl VoteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote. Repeated votes from the same member count once.
    pub fn record(&mut self, voter: MemberId, granted: bool) {
        if self.granted.contains(&voter) || self.rejected.contains(&voter) {
            return;
        }
        if granted {
            self.granted.insert(voter);
        } else {
            self.rejected.insert(voter);
        }
    }

    /// Tally votes from `voters` only.
    pub fn tally(&self, voters: &[MemberId]) -> VoteResult {
        let quorum = quorum_size(voters.len());
        let granted = voters.iter().filter(|v| self.granted.contains(*v)).count();
        let rejected = voters.iter().filter(|v| self.rejected.contains(*v)).count();
        if granted >= quorum {
            VoteResult::Won
        } else if rejected > voters.len() - quorum {
            VoteResult::Lost
        } else {
            VoteResult::Pending
        }
    }
}
