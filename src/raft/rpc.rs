//! Consensus messages exchanged between replicas of a partition.

use super::log::{LogEntry, Snapshot, Term};
use crate::control::membership::MemberId;
use crate::control::routing::PartitionKey;
use serde::{Deserialize, Serialize};

/// Vote solicitation from a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub term: Term,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

/// Log replication and heartbeat from the leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: Term,
    pub prev_log_index: u64,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
    /// Highest read context this heartbeat confirms leadership for.
    pub read_context: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// On success, the last index known to match the leader.
    pub match_index: u64,
    /// The follower's last log index, used to skip back faster on rejection.
    pub last_log_index: u64,
    /// Echo of the request's read context.
    pub read_context: Option<u64>,
}

/// Full state transfer to a follower behind the leader's compacted prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: Term,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
    /// Follower's last log index after handling the snapshot.
    pub last_log_index: u64,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
}

impl RaftMessage {
    /// Term carried by the message.
    pub fn term(&self) -> Term {
        match self {
            Self::RequestVote(m) => m.term,
            Self::RequestVoteResponse(m) => m.term,
            Self::AppendEntries(m) => m.term,
            Self::AppendEntriesResponse(m) => m.term,
            Self::InstallSnapshot(m) => m.term,
            Self::InstallSnapshotResponse(m) => m.term,
        }
    }

    /// Whether the message can only come from the term's leader.
    pub fn is_from_leader(&self) -> bool {
        matches!(self, Self::AppendEntries(_) | Self::InstallSnapshot(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestVote(_) => "request_vote",
            Self::RequestVoteResponse(_) => "request_vote_response",
            Self::AppendEntries(_) => "append_entries",
            Self::AppendEntriesResponse(_) => "append_entries_response",
            Self::InstallSnapshot(_) => "install_snapshot",
            Self::InstallSnapshotResponse(_) => "install_snapshot_response",
        }
    }
}

/// Addressed message between two replicas of one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub partition: PartitionKey,
    pub from: MemberId,
    pub to: MemberId,
    pub message: RaftMessage,
}
