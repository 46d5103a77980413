//! Deterministic Raft replica for a single partition.
//!
//! [`RaftNode`] performs no I/O of its own apart from the [`LogStorage`] it
//! owns. Time advances through [`RaftNode::tick`], peer messages arrive
//! through [`RaftNode::step`], and everything the node wants to happen next
//! is collected in output queues:
//!
//! - [`RaftNode::take_messages`] - envelopes to hand to the transport
//! - [`RaftNode::take_snapshot_to_restore`] - snapshot the state machine must load
//! - [`RaftNode::take_committed`] - entries ready to apply, in log order
//! - [`RaftNode::take_ready_reads`] - linearizable reads that may be served
//! - [`RaftNode::take_aborted_reads`] - reads that lost their leader
//!
//! Hard state and entries are persisted before any message that depends on
//! them is queued.

use super::election::{ElectionTimer, Role, VoteResult, VoteTracker};
use super::log::{EntryPayload, LogEntry, RaftLog, Snapshot, SnapshotMeta, Term};
use super::quorum::PartitionQuorum;
use super::read_index::{ReadState, ReadTracker};
use super::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, Envelope, InstallSnapshotRequest,
    InstallSnapshotResponse, RaftMessage, RequestVoteRequest, RequestVoteResponse,
};
use crate::control::membership::MemberId;
use crate::control::routing::PartitionKey;
use crate::core::error::{TrellisError, TrellisResult};
use crate::storage::{HardState, LogStorage};
use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeSet;

/// Static parameters of one replica.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: MemberId,
    pub partition: PartitionKey,
    /// Initial replica set, including `id` unless the replica is joining.
    pub replicas: Vec<MemberId>,
    /// Base election timeout in ticks.
    pub election_ticks: u32,
    /// Ticks between leader heartbeats.
    pub heartbeat_ticks: u32,
    /// Maximum entries per AppendEntries message.
    pub max_append_entries: usize,
    /// Step down when a majority has not been heard from within an election timeout.
    pub check_quorum: bool,
    /// Seed for election timer randomization.
    pub seed: u64,
}

/// Point-in-time view of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub partition: String,
    pub id: MemberId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: u64,
    pub applied_index: u64,
    pub last_index: u64,
    pub snapshot_index: u64,
    pub replicas: Vec<MemberId>,
}

pub struct RaftNode {
    id: MemberId,
    partition: PartitionKey,
    heartbeat_ticks: u32,
    max_append_entries: usize,
    check_quorum: bool,

    storage: Box<dyn LogStorage>,
    log: RaftLog,
    snapshot: Option<Snapshot>,

    role: Role,
    term: Term,
    voted_for: Option<MemberId>,
    leader: Option<MemberId>,
    replicas: Vec<MemberId>,
    pending_reconfigure: Option<u64>,

    commit_index: u64,
    applied_index: u64,

    election_timer: ElectionTimer,
    heartbeat_elapsed: u32,
    quorum_elapsed: u32,
    votes: VoteTracker,
    progress: PartitionQuorum,
    reads: ReadTracker,

    outbox: Vec<Envelope>,
    aborted_reads: Vec<u64>,
    snapshot_to_restore: Option<Snapshot>,
}

impl RaftNode {
    /// Build a replica over `storage`, recovering any persisted state.
    pub fn new(config: NodeConfig, mut storage: Box<dyn LogStorage>) -> Result<Self> {
        if config.heartbeat_ticks == 0 || config.heartbeat_ticks >= config.election_ticks {
            anyhow::bail!(
                "heartbeat ticks ({}) must be positive and below election ticks ({})",
                config.heartbeat_ticks,
                config.election_ticks
            );
        }
        if config.max_append_entries == 0 {
            anyhow::bail!("max_append_entries must be positive");
        }

        let recovered = storage.recover()?;
        let log = RaftLog::from_parts(
            recovered.snapshot.as_ref().map(|s| &s.meta),
            recovered.entries,
        );
        let replicas = recovered
            .snapshot
            .as_ref()
            .map(|s| s.meta.replicas.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| config.replicas.clone());
        let snapshot_index = log.snapshot_index();

        tracing::debug!(
            partition = %config.partition,
            member = %config.id,
            term = recovered.hard_state.term,
            snapshot_index,
            last_index = log.last_index(),
            "recovered replica state"
        );

        Ok(Self {
            election_timer: ElectionTimer::new(config.election_ticks, config.seed),
            id: config.id,
            partition: config.partition,
            heartbeat_ticks: config.heartbeat_ticks,
            max_append_entries: config.max_append_entries,
            check_quorum: config.check_quorum,
            storage,
            log,
            snapshot: recovered.snapshot.clone(),
            role: Role::Follower,
            term: recovered.hard_state.term,
            voted_for: recovered.hard_state.voted_for,
            leader: None,
            replicas: dedup(replicas),
            pending_reconfigure: None,
            commit_index: snapshot_index,
            applied_index: snapshot_index,
            heartbeat_elapsed: 0,
            quorum_elapsed: 0,
            votes: VoteTracker::new(),
            progress: PartitionQuorum::default(),
            reads: ReadTracker::new(),
            outbox: Vec::new(),
            aborted_reads: Vec::new(),
            snapshot_to_restore: recovered.snapshot,
        })
    }

    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn leader(&self) -> Option<&MemberId> {
        self.leader.as_ref()
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn applied_index(&self) -> u64 {
        self.applied_index
    }

    pub fn last_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn snapshot_index(&self) -> u64 {
        self.log.snapshot_index()
    }

    pub fn replicas(&self) -> &[MemberId] {
        &self.replicas
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            partition: self.partition.to_string(),
            id: self.id.clone(),
            role: self.role,
            term: self.term,
            leader: self.leader.clone(),
            commit_index: self.commit_index,
            applied_index: self.applied_index,
            last_index: self.log.last_index(),
            snapshot_index: self.log.snapshot_index(),
            replicas: self.replicas.clone(),
        }
    }

    /// Advance logical time by one tick.
    pub fn tick(&mut self) -> Result<()> {
        match self.role {
            Role::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.heartbeat_ticks {
                    self.heartbeat_elapsed = 0;
                    self.broadcast_append();
                }
                if self.check_quorum {
                    self.quorum_elapsed += 1;
                    if self.quorum_elapsed >= self.election_timer.base_ticks() {
                        self.quorum_elapsed = 0;
                        if !self.progress.quorum_active(&self.replicas, &self.id) {
                            tracing::warn!(
                                partition = %self.partition,
                                member = %self.id,
                                term = self.term,
                                "lost contact with quorum, stepping down"
                            );
                            self.become_follower(self.term, None)?;
                            return Ok(());
                        }
                        self.progress.reset_activity();
                    }
                }
            }
            Role::Follower | Role::Candidate => {
                if self.election_timer.tick() {
                    self.campaign()?;
                }
            }
        }
        Ok(())
    }

    /// Handle a message from another replica of this partition.
    pub fn step(&mut self, envelope: Envelope) -> Result<()> {
        if envelope.to != self.id || envelope.partition != self.partition {
            tracing::debug!(
                partition = %self.partition,
                to = %envelope.to,
                "dropping misaddressed message"
            );
            return Ok(());
        }
        let Envelope { from, message, .. } = envelope;
        let msg_term = message.term();

        if msg_term > self.term {
            if let RaftMessage::RequestVote(_) = message {
                // A follower that heard from a live leader within the minimum
                // election timeout ignores disruptive candidates.
                if self.check_quorum
                    && self.leader.is_some()
                    && self.election_timer.elapsed() < self.election_timer.base_ticks()
                {
                    tracing::debug!(
                        partition = %self.partition,
                        candidate = %from,
                        "ignoring vote request under leader lease"
                    );
                    return Ok(());
                }
            }
            let leader = message.is_from_leader().then(|| from.clone());
            self.become_follower(msg_term, leader)?;
        } else if msg_term < self.term {
            self.reject_stale(from, &message);
            return Ok(());
        }

        match message {
            RaftMessage::RequestVote(req) => self.handle_request_vote(from, req),
            RaftMessage::RequestVoteResponse(resp) => self.handle_vote_response(from, resp),
            RaftMessage::AppendEntries(req) => self.handle_append_entries(from, req),
            RaftMessage::AppendEntriesResponse(resp) => self.handle_append_response(from, resp),
            RaftMessage::InstallSnapshot(req) => self.handle_install_snapshot(from, req),
            RaftMessage::InstallSnapshotResponse(resp) => {
                self.handle_snapshot_response(from, resp);
                Ok(())
            }
        }
    }

    /// Append a payload to the leader's log.
    ///
    /// Returns the index the entry will occupy if it commits.
    pub fn propose(&mut self, payload: EntryPayload) -> TrellisResult<u64> {
        if self.role != Role::Leader {
            return Err(TrellisError::not_leader(self.leader.clone()));
        }
        if let EntryPayload::Reconfigure { replicas } = &payload {
            self.validate_reconfigure(replicas)?;
        }
        let is_reconfigure = matches!(payload, EntryPayload::Reconfigure { .. });
        let entry = self.log.next_entry(self.term, payload);
        self.storage
            .append(std::slice::from_ref(&entry))
            .map_err(|e| TrellisError::internal(format!("failed to persist entry: {e:#}")))?;
        self.log.push(entry.clone());
        if is_reconfigure {
            self.pending_reconfigure = Some(entry.index);
        }
        self.maybe_commit();
        self.broadcast_append();
        Ok(entry.index)
    }

    /// Register a linearizable read under `ctx`.
    ///
    /// The read becomes available from [`take_ready_reads`](Self::take_ready_reads)
    /// once a majority has confirmed this replica is still leader.
    pub fn read_index(&mut self, ctx: u64) -> TrellisResult<()> {
        if self.role != Role::Leader {
            return Err(TrellisError::not_leader(self.leader.clone()));
        }
        let index = self.committed_in_term().then_some(self.commit_index);
        self.reads.push(ctx, index, &self.id, &self.replicas);
        if self.reads.latest_context().is_some() {
            self.broadcast_append();
        }
        Ok(())
    }

    /// Fold everything up to `index` into a snapshot holding `data`.
    pub fn compact(&mut self, index: u64, data: Bytes) -> Result<()> {
        if index <= self.log.snapshot_index() {
            return Ok(());
        }
        if index > self.applied_index {
            anyhow::bail!(
                "cannot snapshot index {index} beyond applied index {}",
                self.applied_index
            );
        }
        let term = self
            .log
            .term_at(index)
            .ok_or_else(|| anyhow::anyhow!("no entry at index {index} to snapshot"))?;
        let snapshot = Snapshot {
            meta: SnapshotMeta {
                index,
                term,
                replicas: self.replicas.clone(),
            },
            data,
        };
        self.storage.install_snapshot(&snapshot)?;
        self.log.compact(index, term);
        self.snapshot = Some(snapshot);
        tracing::debug!(
            partition = %self.partition,
            member = %self.id,
            index,
            "compacted log"
        );
        Ok(())
    }

    pub fn take_messages(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }

    /// Snapshot installed from the leader that the state machine must load
    /// before applying further entries.
    pub fn take_snapshot_to_restore(&mut self) -> Option<Snapshot> {
        self.snapshot_to_restore.take()
    }

    /// Committed entries not yet handed out, advancing the applied index.
    pub fn take_committed(&mut self) -> Vec<LogEntry> {
        if self.commit_index <= self.applied_index {
            return Vec::new();
        }
        let entries = self
            .log
            .entries_between(self.applied_index + 1, self.commit_index);
        if let Some(last) = entries.last() {
            self.applied_index = last.index;
        }
        entries
    }

    pub fn take_ready_reads(&mut self) -> Vec<ReadState> {
        self.reads.take_ready()
    }

    pub fn take_aborted_reads(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.aborted_reads)
    }

    fn committed_in_term(&self) -> bool {
        self.log.term_at(self.commit_index) == Some(self.term)
    }

    fn persist_hard_state(&mut self) -> Result<()> {
        self.storage.save_hard_state(&HardState {
            term: self.term,
            voted_for: self.voted_for.clone(),
        })
    }

    fn send(&mut self, to: MemberId, message: RaftMessage) {
        self.outbox.push(Envelope {
            partition: self.partition.clone(),
            from: self.id.clone(),
            to,
            message,
        });
    }

    fn campaign(&mut self) -> Result<()> {
        if !self.replicas.contains(&self.id) {
            self.election_timer.reset();
            return Ok(());
        }
        self.term += 1;
        self.role = Role::Candidate;
        self.leader = None;
        self.voted_for = Some(self.id.clone());
        self.persist_hard_state()?;
        self.election_timer.reset();
        self.votes = VoteTracker::new();
        self.votes.record(self.id.clone(), true);

        tracing::debug!(
            partition = %self.partition,
            member = %self.id,
            term = self.term,
            "starting election"
        );

        if self.votes.tally(&self.replicas) == VoteResult::Won {
            return self.become_leader();
        }
        let request = RequestVoteRequest {
            term: self.term,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let peers: Vec<MemberId> = self
            .replicas
            .iter()
            .filter(|r| **r != self.id)
            .cloned()
            .collect();
        for peer in peers {
            self.send(peer, RaftMessage::RequestVote(request.clone()));
        }
        Ok(())
    }

    fn become_follower(&mut self, term: Term, leader: Option<MemberId>) -> Result<()> {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
            self.persist_hard_state()?;
        }
        if self.role == Role::Leader {
            tracing::info!(
                partition = %self.partition,
                member = %self.id,
                term = self.term,
                "stepped down from leader"
            );
            self.aborted_reads.extend(self.reads.abort_all());
            self.pending_reconfigure = None;
        }
        self.role = Role::Follower;
        self.leader = leader;
        self.election_timer.reset();
        Ok(())
    }

    fn become_leader(&mut self) -> Result<()> {
        self.role = Role::Leader;
        self.leader = Some(self.id.clone());
        self.heartbeat_elapsed = 0;
        self.quorum_elapsed = 0;
        self.progress = PartitionQuorum::new(&self.replicas, &self.id, self.log.last_index());
        self.reads = ReadTracker::new();
        self.pending_reconfigure = self
            .log
            .entries_between(self.commit_index + 1, self.log.last_index())
            .iter()
            .rev()
            .find(|e| matches!(e.payload, EntryPayload::Reconfigure { .. }))
            .map(|e| e.index);

        tracing::info!(
            partition = %self.partition,
            member = %self.id,
            term = self.term,
            "became leader"
        );

        let noop = self.log.next_entry(self.term, EntryPayload::Noop);
        self.storage.append(std::slice::from_ref(&noop))?;
        self.log.push(noop);
        self.maybe_commit();
        self.broadcast_append();
        Ok(())
    }

    fn reject_stale(&mut self, from: MemberId, message: &RaftMessage) {
        let reply = match message {
            RaftMessage::RequestVote(_) => RaftMessage::RequestVoteResponse(RequestVoteResponse {
                term: self.term,
                vote_granted: false,
            }),
            RaftMessage::AppendEntries(_) => {
                RaftMessage::AppendEntriesResponse(AppendEntriesResponse {
                    term: self.term,
                    success: false,
                    match_index: 0,
                    last_log_index: self.log.last_index(),
                    read_context: None,
                })
            }
            RaftMessage::InstallSnapshot(_) => {
                RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
                    term: self.term,
                    last_log_index: self.log.last_index(),
                })
            }
            _ => return,
        };
        self.send(from, reply);
    }

    fn handle_request_vote(&mut self, from: MemberId, req: RequestVoteRequest) -> Result<()> {
        let can_vote = self.voted_for.as_ref() == Some(&from)
            || (self.voted_for.is_none() && self.leader.is_none());
        let granted = can_vote && self.log.is_up_to_date(req.last_log_index, req.last_log_term);
        if granted {
            self.voted_for = Some(from.clone());
            self.persist_hard_state()?;
            self.election_timer.reset();
        }
        tracing::debug!(
            partition = %self.partition,
            member = %self.id,
            candidate = %from,
            term = self.term,
            granted,
            "vote request"
        );
        self.send(
            from,
            RaftMessage::RequestVoteResponse(RequestVoteResponse {
                term: self.term,
                vote_granted: granted,
            }),
        );
        Ok(())
    }

    fn handle_vote_response(&mut self, from: MemberId, resp: RequestVoteResponse) -> Result<()> {
        if self.role != Role::Candidate {
            return Ok(());
        }
        self.votes.record(from, resp.vote_granted);
        match self.votes.tally(&self.replicas) {
            VoteResult::Won => self.become_leader(),
            VoteResult::Lost => self.become_follower(self.term, None),
            VoteResult::Pending => Ok(()),
        }
    }

    fn handle_append_entries(&mut self, from: MemberId, req: AppendEntriesRequest) -> Result<()> {
        if self.role != Role::Follower {
            self.become_follower(self.term, Some(from.clone()))?;
        }
        self.leader = Some(from.clone());
        self.election_timer.reset();

        let mut response = AppendEntriesResponse {
            term: self.term,
            success: false,
            match_index: 0,
            last_log_index: self.log.last_index(),
            read_context: req.read_context,
        };

        if req.prev_log_index < self.commit_index {
            // Everything up to our commit index already matches the leader.
            response.success = true;
            response.match_index = self.commit_index;
        } else if !self.log.matches(req.prev_log_index, req.prev_log_term) {
            tracing::debug!(
                partition = %self.partition,
                member = %self.id,
                prev_log_index = req.prev_log_index,
                prev_log_term = req.prev_log_term,
                "rejecting append with mismatched prefix"
            );
        } else {
            let last_new = req.prev_log_index + req.entries.len() as u64;
            let reconciled = self.log.reconcile(req.entries);
            if let Some(index) = reconciled.truncated_from {
                self.storage.truncate_from(index)?;
            }
            if !reconciled.appended.is_empty() {
                self.storage.append(&reconciled.appended)?;
            }
            let commit = req.leader_commit.min(last_new);
            if commit > self.commit_index {
                self.advance_commit(commit);
            }
            response.success = true;
            response.match_index = last_new;
            response.last_log_index = self.log.last_index();
        }

        self.send(from, RaftMessage::AppendEntriesResponse(response));
        Ok(())
    }

    fn handle_append_response(
        &mut self,
        from: MemberId,
        resp: AppendEntriesResponse,
    ) -> Result<()> {
        if self.role != Role::Leader {
            return Ok(());
        }
        let Some(progress) = self.progress.get_mut(&from) else {
            return Ok(());
        };
        progress.recent_active = true;

        if resp.success {
            if progress.advance(resp.match_index) {
                self.maybe_commit();
            }
        } else {
            progress.back_off(resp.last_log_index);
        }
        if let Some(ctx) = resp.read_context {
            self.reads.ack(&from, ctx, &self.replicas);
        }

        let behind = self
            .progress
            .get(&from)
            .is_some_and(|p| p.next_index <= self.log.last_index());
        if behind || !resp.success {
            self.send_append(&from);
        }
        Ok(())
    }

    fn handle_install_snapshot(
        &mut self,
        from: MemberId,
        req: InstallSnapshotRequest,
    ) -> Result<()> {
        if self.role != Role::Follower {
            self.become_follower(self.term, Some(from.clone()))?;
        }
        self.leader = Some(from.clone());
        self.election_timer.reset();

        let meta = req.snapshot.meta.clone();
        if meta.index > self.commit_index {
            tracing::info!(
                partition = %self.partition,
                member = %self.id,
                index = meta.index,
                term = meta.term,
                "installing snapshot from leader"
            );
            self.log.restore_snapshot(meta.index, meta.term);
            self.storage.install_snapshot(&req.snapshot)?;
            if self.log.last_index() == meta.index {
                self.storage.truncate_from(meta.index + 1)?;
            }
            if !meta.replicas.is_empty() {
                self.replicas = dedup(meta.replicas);
            }
            self.commit_index = meta.index;
            self.applied_index = meta.index;
            self.snapshot = Some(req.snapshot.clone());
            self.snapshot_to_restore = Some(req.snapshot);
        }

        self.send(
            from,
            RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
                term: self.term,
                last_log_index: self.log.last_index(),
            }),
        );
        Ok(())
    }

    fn handle_snapshot_response(&mut self, from: MemberId, resp: InstallSnapshotResponse) {
        if self.role != Role::Leader {
            return;
        }
        let last_index = self.log.last_index();
        let Some(progress) = self.progress.get_mut(&from) else {
            return;
        };
        progress.recent_active = true;
        progress.next_index =
            (resp.last_log_index.min(last_index) + 1).max(progress.match_index + 1);
        self.send_append(&from);
    }

    fn broadcast_append(&mut self) {
        let peers: Vec<MemberId> = self.progress.peers().cloned().collect();
        for peer in peers {
            self.send_append(&peer);
        }
    }

    fn send_append(&mut self, peer: &MemberId) {
        let Some(progress) = self.progress.get(peer) else {
            return;
        };
        let next_index = progress.next_index;

        if next_index <= self.log.snapshot_index() {
            let Some(snapshot) = self.snapshot.clone() else {
                tracing::error!(
                    partition = %self.partition,
                    follower = %peer,
                    "follower needs compacted entries but no snapshot is held"
                );
                return;
            };
            tracing::debug!(
                partition = %self.partition,
                follower = %peer,
                index = snapshot.meta.index,
                "sending snapshot"
            );
            self.send(
                peer.clone(),
                RaftMessage::InstallSnapshot(InstallSnapshotRequest {
                    term: self.term,
                    snapshot,
                }),
            );
            return;
        }

        let prev_log_index = next_index - 1;
        let Some(prev_log_term) = self.log.term_at(prev_log_index) else {
            return;
        };
        let entries = self.log.entries_from(next_index, self.max_append_entries);
        if let (Some(last), Some(progress)) = (entries.last(), self.progress.get_mut(peer)) {
            progress.next_index = last.index + 1;
        }
        let request = AppendEntriesRequest {
            term: self.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
            read_context: self.reads.latest_context(),
        };
        self.send(peer.clone(), RaftMessage::AppendEntries(request));
    }

    fn maybe_commit(&mut self) {
        if self.role != Role::Leader {
            return;
        }
        let quorum_index =
            self.progress
                .quorum_match_index(&self.replicas, &self.id, self.log.last_index());
        if quorum_index > self.commit_index && self.log.term_at(quorum_index) == Some(self.term) {
            self.advance_commit(quorum_index);
        }
    }

    fn advance_commit(&mut self, commit_index: u64) {
        let previous = self.commit_index;
        self.commit_index = commit_index;

        for entry in self.log.entries_between(previous + 1, commit_index) {
            if let EntryPayload::Reconfigure { replicas } = entry.payload {
                self.apply_reconfigure(entry.index, replicas);
            }
        }
        if self.role == Role::Leader && self.committed_in_term() {
            self.reads.assign_index(self.commit_index);
        }
    }

    fn apply_reconfigure(&mut self, index: u64, replicas: Vec<MemberId>) {
        self.replicas = dedup(replicas);
        tracing::info!(
            partition = %self.partition,
            member = %self.id,
            index,
            replicas = ?self.replicas,
            "replica set changed"
        );
        if self.pending_reconfigure.is_some_and(|p| p <= index) {
            self.pending_reconfigure = None;
        }
        if self.role == Role::Leader {
            if self.replicas.contains(&self.id) {
                self.progress
                    .set_replicas(&self.replicas, &self.id, self.log.last_index());
            } else {
                // Replicate the commit before leaving so followers learn it.
                self.broadcast_append();
                self.role = Role::Follower;
                self.leader = None;
                self.aborted_reads.extend(self.reads.abort_all());
                self.election_timer.reset();
            }
        }
    }

    fn validate_reconfigure(&self, replicas: &[MemberId]) -> TrellisResult<()> {
        if self.pending_reconfigure.is_some() {
            return Err(TrellisError::invalid_command(
                "a replica set change is already in progress",
            ));
        }
        let current: BTreeSet<&MemberId> = self.replicas.iter().collect();
        let proposed: BTreeSet<&MemberId> = replicas.iter().collect();
        if proposed.is_empty() {
            return Err(TrellisError::invalid_command("replica set cannot be empty"));
        }
        let changed = current.symmetric_difference(&proposed).count();
        if changed != 1 {
            return Err(TrellisError::invalid_command(format!(
                "replica set changes must add or remove exactly one member, got {changed}"
            )));
        }
        Ok(())
    }
}

fn dedup(replicas: Vec<MemberId>) -> Vec<MemberId> {
    let mut seen = BTreeSet::new();
    replicas
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect()
}
