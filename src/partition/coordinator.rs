//! Binds one Raft replica to one resource state machine.
//!
//! The coordinator is synchronous and owned by a single driver task, so every
//! mutation of a partition's term, log tail and applied state is serialized.
//! Client operations are accepted with a [`Responder`] and resolved from
//! [`PartitionCoordinator::drain`] once their entry is applied or their read
//! is confirmed.

use crate::control::membership::MemberId;
use crate::core::error::TrellisError;
use crate::raft::log::{EntryPayload, Term};
use crate::raft::node::{NodeStatus, RaftNode};
use crate::raft::read_index::ReadState;
use crate::raft::rpc::Envelope;
use crate::resource::completion::{completion_pair, raw, CompletionHandle, Responder};
use crate::resource::state_machine::{Command, ResourceStateMachine, ResourceType};
use anyhow::{Context, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Command waiting for its entry to be applied.
struct PendingCommand {
    term: Term,
    responder: Responder,
}

/// Read waiting for leadership confirmation.
struct PendingQuery {
    query: Bytes,
    responder: Responder,
}

pub struct PartitionCoordinator {
    node: RaftNode,
    state_machine: Box<dyn ResourceStateMachine>,
    pending_commands: BTreeMap<u64, PendingCommand>,
    pending_queries: HashMap<u64, PendingQuery>,
    confirmed_reads: VecDeque<ReadState>,
    next_read_ctx: u64,
    snapshot_threshold: u64,
}

impl PartitionCoordinator {
    /// `snapshot_threshold` of zero disables automatic snapshots.
    pub fn new(
        node: RaftNode,
        state_machine: Box<dyn ResourceStateMachine>,
        snapshot_threshold: u64,
    ) -> Self {
        Self {
            node,
            state_machine,
            pending_commands: BTreeMap::new(),
            pending_queries: HashMap::new(),
            confirmed_reads: VecDeque::new(),
            next_read_ctx: 1,
            snapshot_threshold,
        }
    }

    pub fn node(&self) -> &RaftNode {
        &self.node
    }

    pub fn resource_type(&self) -> ResourceType {
        self.state_machine.resource_type()
    }

    pub fn status(&self) -> NodeStatus {
        self.node.status()
    }

    /// Number of operations accepted but not yet resolved.
    pub fn pending(&self) -> usize {
        self.pending_commands.len() + self.pending_queries.len()
    }

    /// Append a command; the returned handle resolves once it is applied.
    pub fn submit(&mut self, command: Command) -> CompletionHandle<Bytes> {
        let (responder, handle) = completion_pair(raw);
        self.submit_with(command, responder);
        handle
    }

    /// Serve a read-only query from applied state after confirming leadership.
    pub fn query(&mut self, query: Bytes) -> CompletionHandle<Bytes> {
        let (responder, handle) = completion_pair(raw);
        self.query_with(query, responder);
        handle
    }

    pub fn submit_with(&mut self, command: Command, responder: Responder) {
        if command.resource_type != self.resource_type() {
            let _ = responder.send(Err(TrellisError::invalid_command(format!(
                "{} command sent to {} partition",
                command.resource_type,
                self.resource_type()
            ))));
            return;
        }
        self.propose(EntryPayload::Command(command), responder);
    }

    pub fn query_with(&mut self, query: Bytes, responder: Responder) {
        let ctx = self.next_read_ctx;
        match self.node.read_index(ctx) {
            Ok(()) => {
                self.next_read_ctx += 1;
                self.pending_queries
                    .insert(ctx, PendingQuery { query, responder });
            }
            Err(err) => {
                let _ = responder.send(Err(err));
            }
        }
    }

    /// Replace the partition's replica set with `replicas`.
    pub fn reconfigure_with(&mut self, replicas: Vec<MemberId>, responder: Responder) {
        self.propose(EntryPayload::Reconfigure { replicas }, responder);
    }

    fn propose(&mut self, payload: EntryPayload, responder: Responder) {
        match self.node.propose(payload) {
            Ok(index) => {
                let term = self.node.term();
                self.pending_commands
                    .insert(index, PendingCommand { term, responder });
            }
            Err(err) => {
                let _ = responder.send(Err(err));
            }
        }
    }

    pub fn tick(&mut self) -> Result<()> {
        self.node.tick()
    }

    pub fn step(&mut self, envelope: Envelope) -> Result<()> {
        self.node.step(envelope)
    }

    /// Apply what the replica has committed, resolve what can be resolved
    /// and return the messages to send.
    pub fn drain(&mut self) -> Result<Vec<Envelope>> {
        if let Some(snapshot) = self.node.take_snapshot_to_restore() {
            self.state_machine
                .restore(&snapshot.data)
                .with_context(|| format!("failed to restore snapshot at {}", snapshot.meta.index))?;
            // Commands at or below the snapshot were applied elsewhere; this
            // replica cannot report their results.
            let covered: Vec<u64> = self
                .pending_commands
                .range(..=snapshot.meta.index)
                .map(|(index, _)| *index)
                .collect();
            for index in covered {
                if let Some(pending) = self.pending_commands.remove(&index) {
                    let _ = pending.responder.send(Err(TrellisError::Timeout));
                }
            }
        }

        for entry in self.node.take_committed() {
            let result = match &entry.payload {
                EntryPayload::Command(command) if command.resource_type == self.resource_type() => {
                    self.state_machine.apply(entry.index, &command.data)
                }
                EntryPayload::Command(command) => Err(TrellisError::invalid_command(format!(
                    "unexpected {} command",
                    command.resource_type
                ))),
                EntryPayload::Noop | EntryPayload::Reconfigure { .. } => Ok(Bytes::new()),
            };
            if let Some(pending) = self.pending_commands.remove(&entry.index) {
                let outcome = if pending.term == entry.term {
                    result
                } else {
                    Err(TrellisError::not_leader(self.node.leader().cloned()))
                };
                let _ = pending.responder.send(outcome);
            }
        }

        self.confirmed_reads.extend(self.node.take_ready_reads());
        let applied = self.node.applied_index();
        while let Some(read) = self.confirmed_reads.front() {
            if read.index > applied {
                break;
            }
            let ctx = read.ctx;
            self.confirmed_reads.pop_front();
            if let Some(pending) = self.pending_queries.remove(&ctx) {
                let _ = pending
                    .responder
                    .send(self.state_machine.query(&pending.query));
            }
        }

        for ctx in self.node.take_aborted_reads() {
            if let Some(pending) = self.pending_queries.remove(&ctx) {
                let _ = pending
                    .responder
                    .send(Err(TrellisError::not_leader(self.node.leader().cloned())));
            }
        }

        self.maybe_snapshot()?;
        Ok(self.node.take_messages())
    }

    fn maybe_snapshot(&mut self) -> Result<()> {
        if self.snapshot_threshold == 0 {
            return Ok(());
        }
        let applied = self.node.applied_index();
        if applied.saturating_sub(self.node.snapshot_index()) < self.snapshot_threshold {
            return Ok(());
        }
        let data = self
            .state_machine
            .snapshot()
            .context("failed to snapshot state machine")?;
        self.node.compact(applied, data)
    }

    /// Resolve every outstanding operation with `error`.
    pub fn fail_pending(&mut self, error: TrellisError) {
        for (_, pending) in std::mem::take(&mut self.pending_commands) {
            let _ = pending.responder.send(Err(error.clone()));
        }
        for (_, pending) in self.pending_queries.drain() {
            let _ = pending.responder.send(Err(error.clone()));
        }
        self.confirmed_reads.clear();
    }
}

impl std::fmt::Debug for PartitionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionCoordinator")
            .field("partition", self.node.partition())
            .field("member", self.node.id())
            .field("resource_type", &self.resource_type())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::routing::{PartitionId, PartitionKey};
    use crate::raft::node::NodeConfig;
    use crate::resource::atomic_value::{
        AtomicValueCommand, AtomicValueQuery, AtomicValueStateMachine,
    };
    use crate::resource::multimap::MultiMapStateMachine;
    use crate::resource::state_machine::{decode, encode};
    use crate::storage::MemoryLogStorage;

    fn coordinator(snapshot_threshold: u64) -> PartitionCoordinator {
        let node = RaftNode::new(
            NodeConfig {
                id: MemberId::new("a"),
                partition: PartitionKey::new("value", PartitionId(1)),
                replicas: vec![MemberId::new("a")],
                election_ticks: 3,
                heartbeat_ticks: 1,
                max_append_entries: 16,
                check_quorum: false,
                seed: 1,
            },
            Box::new(MemoryLogStorage::new()),
        )
        .unwrap();
        PartitionCoordinator::new(
            node,
            Box::new(AtomicValueStateMachine::new()),
            snapshot_threshold,
        )
    }

    fn elect(c: &mut PartitionCoordinator) {
        for _ in 0..10 {
            c.tick().unwrap();
            c.drain().unwrap();
            if c.node().is_leader() {
                return;
            }
        }
        panic!("no leader");
    }

    fn set(value: &'static [u8]) -> Command {
        Command::encode(
            ResourceType::AtomicValue,
            &AtomicValueCommand::Set {
                value: Some(Bytes::from_static(value)),
            },
        )
        .unwrap()
    }

    #[test]
    fn submit_before_election_is_not_leader() {
        let mut c = coordinator(0);
        let mut handle = c.submit(set(b"x"));
        assert_eq!(handle.try_result(), Some(Err(TrellisError::not_leader(None))));
    }

    #[test]
    fn submit_resolves_after_apply() {
        let mut c = coordinator(0);
        elect(&mut c);

        let mut first = c.submit(set(b"x"));
        assert!(first.try_result().is_none());
        c.drain().unwrap();
        let previous: Option<Bytes> = decode(&first.try_result().unwrap().unwrap()).unwrap();
        assert_eq!(previous, None);

        let mut second = c.submit(set(b"y"));
        c.drain().unwrap();
        let previous: Option<Bytes> = decode(&second.try_result().unwrap().unwrap()).unwrap();
        assert_eq!(previous, Some(Bytes::from_static(b"x")));
    }

    #[test]
    fn query_reflects_applied_state() {
        let mut c = coordinator(0);
        elect(&mut c);
        c.submit(set(b"x"));
        c.drain().unwrap();

        let mut read = c.query(encode(&AtomicValueQuery::Get).unwrap());
        c.drain().unwrap();
        let value: Option<Bytes> = decode(&read.try_result().unwrap().unwrap()).unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"x")));
    }

    #[test]
    fn mismatched_resource_type_is_rejected() {
        let mut c = coordinator(0);
        elect(&mut c);
        let mut handle = c.submit(Command::new(ResourceType::MultiMap, Bytes::new()));
        assert!(matches!(
            handle.try_result(),
            Some(Err(TrellisError::InvalidCommand { .. }))
        ));
    }

    #[test]
    fn snapshots_after_threshold() {
        let mut c = coordinator(2);
        elect(&mut c);
        c.submit(set(b"a"));
        c.drain().unwrap();
        assert_eq!(c.node().snapshot_index(), 2);

        c.submit(set(b"b"));
        c.drain().unwrap();
        assert_eq!(c.node().snapshot_index(), 2);
        assert_eq!(c.node().applied_index(), 3);

        let mut read = c.query(encode(&AtomicValueQuery::Get).unwrap());
        c.drain().unwrap();
        let value: Option<Bytes> = decode(&read.try_result().unwrap().unwrap()).unwrap();
        assert_eq!(value, Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn fail_pending_resolves_everything() {
        let node = RaftNode::new(
            NodeConfig {
                id: MemberId::new("a"),
                partition: PartitionKey::new("map", PartitionId(1)),
                replicas: vec![MemberId::new("a"), MemberId::new("b"), MemberId::new("c")],
                election_ticks: 3,
                heartbeat_ticks: 1,
                max_append_entries: 16,
                check_quorum: false,
                seed: 1,
            },
            Box::new(MemoryLogStorage::new()),
        )
        .unwrap();
        let mut c = PartitionCoordinator::new(node, Box::new(MultiMapStateMachine::new()), 0);
        let mut handle = c.query(Bytes::new());
        c.fail_pending(TrellisError::unavailable("stopping"));
        assert!(handle.try_result().is_some());
        assert_eq!(c.pending(), 0);
    }
}
