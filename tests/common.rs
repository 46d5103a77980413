//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.
//!
//! [`Simulation`] drives the replicas of one partition deterministically:
//! logical ticks are issued by the test, messages travel through an
//! in-process queue that can drop, reorder and partition them, and every
//! replica's role is recorded after each step.

#![allow(dead_code)]

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use trellis::control::membership::{ClusterMember, ClusterMembership, MemberId};
use trellis::control::routing::{PartitionId, PartitionKey};
use trellis::core::config::Config;
use trellis::core::error::{TrellisError, TrellisResult};
use trellis::partition::PartitionCoordinator;
use trellis::raft::node::{NodeConfig, RaftNode};
use trellis::raft::rpc::Envelope;
use trellis::raft::{Role, Term};
use trellis::resource::completion::{completion_pair, unit, CompletionHandle};
use trellis::resource::registry::ResourceRegistry;
use trellis::resource::state_machine::ResourceType;
use trellis::storage::MemoryLogStorage;

/// Base election timeout used by simulations, in ticks.
pub const ELECTION_TICKS: u32 = 10;

/// Upper bound on delivery rounds per step; a round delivers every queued message.
const MAX_DELIVERY_ROUNDS: usize = 64;

/// Deterministic cluster of replicas for one partition.
pub struct Simulation {
    pub partition: PartitionKey,
    resource_type: ResourceType,
    snapshot_threshold: u64,
    running: BTreeMap<MemberId, PartitionCoordinator>,
    storage: BTreeMap<MemberId, MemoryLogStorage>,
    initial_replicas: BTreeMap<MemberId, Vec<MemberId>>,
    in_flight: Vec<Envelope>,
    isolated: HashSet<MemberId>,
    blocked: HashSet<(MemberId, MemberId)>,
    loss: f64,
    rng: StdRng,
    /// Every member observed as leader, by term.
    pub leaders_by_term: BTreeMap<Term, BTreeSet<MemberId>>,
}

impl Simulation {
    /// Replicas `m0..m{n-1}` of an atomic value partition.
    pub fn new(n: usize, seed: u64) -> Self {
        Self::with_options(n, seed, ResourceType::AtomicValue, 0)
    }

    pub fn with_options(
        n: usize,
        seed: u64,
        resource_type: ResourceType,
        snapshot_threshold: u64,
    ) -> Self {
        let members: Vec<MemberId> = (0..n).map(|i| MemberId::new(format!("m{i}"))).collect();
        let mut sim = Self {
            partition: PartitionKey::new("sim", PartitionId(1)),
            resource_type,
            snapshot_threshold,
            running: BTreeMap::new(),
            storage: BTreeMap::new(),
            initial_replicas: BTreeMap::new(),
            in_flight: Vec::new(),
            isolated: HashSet::new(),
            blocked: HashSet::new(),
            loss: 0.0,
            rng: StdRng::seed_from_u64(seed),
            leaders_by_term: BTreeMap::new(),
        };
        for member in &members {
            sim.add_member(member.clone(), members.clone());
        }
        sim
    }

    /// Start a replica with a fresh log and the given initial replica set.
    pub fn add_member(&mut self, member: MemberId, replicas: Vec<MemberId>) {
        self.storage
            .insert(member.clone(), MemoryLogStorage::new());
        self.initial_replicas.insert(member.clone(), replicas);
        self.start(member);
    }

    fn start(&mut self, member: MemberId) {
        let storage = self.storage[&member].clone();
        let seed = member
            .as_str()
            .bytes()
            .fold(self.rng.gen::<u64>(), |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let node = RaftNode::new(
            NodeConfig {
                id: member.clone(),
                partition: self.partition.clone(),
                replicas: self.initial_replicas[&member].clone(),
                election_ticks: ELECTION_TICKS,
                heartbeat_ticks: 1,
                max_append_entries: 8,
                check_quorum: true,
                seed,
            },
            Box::new(storage),
        )
        .expect("replica starts");
        let state_machine = ResourceRegistry::with_defaults()
            .create(self.resource_type)
            .expect("registered type");
        self.running.insert(
            member,
            PartitionCoordinator::new(node, state_machine, self.snapshot_threshold),
        );
    }

    pub fn members(&self) -> Vec<MemberId> {
        self.storage.keys().cloned().collect()
    }

    pub fn coordinator(&self, member: &MemberId) -> &PartitionCoordinator {
        &self.running[member]
    }

    pub fn coordinator_mut(&mut self, member: &MemberId) -> &mut PartitionCoordinator {
        self.running.get_mut(member).expect("member is running")
    }

    pub fn is_running(&self, member: &MemberId) -> bool {
        self.running.contains_key(member)
    }

    /// Stop a replica, resolving its pending operations as Unavailable.
    pub fn crash(&mut self, member: &MemberId) {
        if let Some(mut coordinator) = self.running.remove(member) {
            coordinator.fail_pending(TrellisError::unavailable("crashed"));
        }
    }

    /// Start a crashed replica over its persisted storage.
    pub fn restart(&mut self, member: &MemberId) {
        assert!(!self.is_running(member), "{member} is already running");
        self.start(member.clone());
    }

    pub fn isolate(&mut self, member: &MemberId) {
        self.isolated.insert(member.clone());
    }

    pub fn heal(&mut self, member: &MemberId) {
        self.isolated.remove(member);
    }

    /// Cut both directions between `a` and `b`.
    pub fn block_link(&mut self, a: &MemberId, b: &MemberId) {
        self.blocked.insert((a.clone(), b.clone()));
        self.blocked.insert((b.clone(), a.clone()));
    }

    pub fn heal_all(&mut self) {
        self.isolated.clear();
        self.blocked.clear();
    }

    /// Probability in `[0, 1)` that a message is dropped.
    pub fn set_loss(&mut self, loss: f64) {
        self.loss = loss;
    }

    /// Advance every running replica by one tick and deliver the resulting traffic.
    pub fn step(&mut self) {
        let members: Vec<MemberId> = self.running.keys().cloned().collect();
        for member in members {
            let coordinator = self.coordinator_mut(&member);
            coordinator.tick().expect("tick");
            let out = coordinator.drain().expect("drain");
            self.in_flight.extend(out);
        }
        self.record_roles();
        self.deliver();
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until `done` holds. Returns false if it never did.
    pub fn run_until(&mut self, max_ticks: usize, mut done: impl FnMut(&Self) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Flush queued messages without advancing time.
    pub fn deliver(&mut self) {
        for _ in 0..MAX_DELIVERY_ROUNDS {
            if self.in_flight.is_empty() {
                return;
            }
            let mut batch = std::mem::take(&mut self.in_flight);
            batch.shuffle(&mut self.rng);
            for envelope in batch {
                if !self.reachable(&envelope.from, &envelope.to) {
                    continue;
                }
                if self.loss > 0.0 && self.rng.gen::<f64>() < self.loss {
                    continue;
                }
                let to = envelope.to.clone();
                let Some(coordinator) = self.running.get_mut(&to) else {
                    continue;
                };
                coordinator.step(envelope).expect("step");
                let out = coordinator.drain().expect("drain");
                self.in_flight.extend(out);
            }
            self.record_roles();
        }
    }

    fn reachable(&self, from: &MemberId, to: &MemberId) -> bool {
        !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.blocked.contains(&(from.clone(), to.clone()))
    }

    fn record_roles(&mut self) {
        for (member, coordinator) in &self.running {
            let node = coordinator.node();
            if node.role() == Role::Leader {
                self.leaders_by_term
                    .entry(node.term())
                    .or_default()
                    .insert(member.clone());
            }
        }
    }

    /// The running leader with the highest term, if any.
    pub fn leader(&self) -> Option<MemberId> {
        self.running
            .iter()
            .filter(|(_, c)| c.node().role() == Role::Leader)
            .max_by_key(|(_, c)| c.node().term())
            .map(|(member, _)| member.clone())
    }

    /// The leader among replicas reachable from a majority, if any.
    pub fn reachable_leader(&self) -> Option<MemberId> {
        self.running
            .iter()
            .filter(|(member, c)| {
                c.node().role() == Role::Leader && !self.isolated.contains(*member)
            })
            .max_by_key(|(_, c)| c.node().term())
            .map(|(member, _)| member.clone())
    }

    /// Run until some reachable replica leads and has committed in its term.
    pub fn elect(&mut self) -> MemberId {
        self.elect_within(50 * ELECTION_TICKS as usize)
            .expect("no leader elected")
    }

    /// Like [`elect`](Self::elect), but gives up after `max_ticks`.
    pub fn elect_within(&mut self, max_ticks: usize) -> Option<MemberId> {
        let elected = self.run_until(max_ticks, |sim| {
            sim.reachable_leader()
                .map(|leader| {
                    let node = sim.coordinator(&leader).node();
                    node.log().term_at(node.commit_index()) == Some(node.term())
                })
                .unwrap_or(false)
        });
        if elected {
            self.reachable_leader()
        } else {
            None
        }
    }

    /// Step until `handle` resolves.
    pub fn resolve<T>(
        &mut self,
        handle: &mut CompletionHandle<T>,
        max_ticks: usize,
    ) -> TrellisResult<T> {
        if let Some(result) = handle.try_result() {
            return result;
        }
        for _ in 0..max_ticks {
            self.step();
            if let Some(result) = handle.try_result() {
                return result;
            }
        }
        panic!("operation did not resolve within {max_ticks} ticks");
    }

    /// Propose a new replica set through `leader`.
    pub fn reconfigure(
        &mut self,
        leader: &MemberId,
        replicas: Vec<MemberId>,
    ) -> CompletionHandle<()> {
        let (responder, handle) = completion_pair(unit);
        self.coordinator_mut(leader).reconfigure_with(replicas, responder);
        handle
    }

    /// Whether every running replica has applied up to `index`.
    pub fn all_applied(&self, index: u64) -> bool {
        self.running
            .values()
            .all(|c| c.node().applied_index() >= index)
    }
}

/// Three-member membership `a`, `b`, `c`.
pub fn three_members() -> ClusterMembership {
    ClusterMembership::new(vec![
        ClusterMember::new("a", "127.0.0.1:7001"),
        ClusterMember::new("b", "127.0.0.1:7002"),
        ClusterMember::new("c", "127.0.0.1:7003"),
    ])
    .expect("membership")
}

/// Write `content` to a temporary config file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Retry an async operation while it fails with a retriable error.
pub async fn retry<T, F, Fut>(attempts: usize, mut op: F) -> TrellisResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = TrellisResult<T>>,
{
    let mut last = Err(TrellisError::Timeout);
    for _ in 0..attempts {
        let result = op().await;
        if !matches!(&result, Err(e) if e.is_retriable()) {
            return result;
        }
        last = result;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    last
}

pub fn bytes(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}
