//! Message transport between partition replicas.
//!
//! Consensus only needs fire-and-forget delivery: Raft tolerates loss,
//! duplication and reordering, so [`Transport::send`] never reports failure.
//! [`InMemoryNetwork`] connects replicas living in one process and can
//! isolate members, cut individual links or delay delivery.

use super::driver::PartitionHandle;
use crate::control::membership::MemberId;
use crate::control::routing::PartitionKey;
use crate::raft::rpc::Envelope;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Outbound path for consensus messages.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, envelope: Envelope);
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct NetworkState {
    routes: HashMap<(MemberId, PartitionKey), PartitionHandle>,
    isolated: HashSet<MemberId>,
    blocked: HashSet<(MemberId, MemberId)>,
    delay: Option<Duration>,
}

impl NetworkState {
    fn reachable(&self, from: &MemberId, to: &MemberId) -> bool {
        !self.isolated.contains(from)
            && !self.isolated.contains(to)
            && !self.blocked.contains(&(from.clone(), to.clone()))
    }
}

/// In-process network shared by every runtime of a cluster.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route messages for `handle`'s partition on its member to it.
    pub fn register(&self, handle: PartitionHandle) {
        let route = (handle.member().clone(), handle.key().clone());
        self.state.write().routes.insert(route, handle);
    }

    pub fn unregister(&self, member: &MemberId, partition: &PartitionKey) {
        self.state
            .write()
            .routes
            .remove(&(member.clone(), partition.clone()));
    }

    /// Drop all traffic to and from `member`.
    pub fn isolate(&self, member: &MemberId) {
        tracing::debug!(%member, "isolating member");
        self.state.write().isolated.insert(member.clone());
    }

    pub fn heal(&self, member: &MemberId) {
        tracing::debug!(%member, "healing member");
        self.state.write().isolated.remove(member);
    }

    /// Drop traffic between `a` and `b` in both directions.
    pub fn block_link(&self, a: &MemberId, b: &MemberId) {
        let mut state = self.state.write();
        state.blocked.insert((a.clone(), b.clone()));
        state.blocked.insert((b.clone(), a.clone()));
    }

    /// Restore every member and link.
    pub fn heal_all(&self) {
        let mut state = self.state.write();
        state.isolated.clear();
        state.blocked.clear();
    }

    /// Delay every delivery by `delay`, or deliver immediately with `None`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().delay = delay;
    }

    /// Number of partition replicas currently reachable through this network.
    pub fn route_count(&self) -> usize {
        self.state.read().routes.len()
    }

    pub fn stats(&self) -> NetworkStats {
        NetworkStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Transport for InMemoryNetwork {
    fn send(&self, envelope: Envelope) {
        let (target, delay) = {
            let state = self.state.read();
            if !state.reachable(&envelope.from, &envelope.to) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let route = (envelope.to.clone(), envelope.partition.clone());
            (state.routes.get(&route).cloned(), state.delay)
        };
        let Some(target) = target else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match delay {
            Some(delay) => {
                let network = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Partitions may have formed while the message was in flight.
                    let reachable = network.state.read().reachable(&envelope.from, &envelope.to);
                    network.record(reachable && target.deliver(envelope));
                });
            }
            None => self.record(target.deliver(envelope)),
        }
    }
}

impl InMemoryNetwork {
    fn record(&self, delivered: bool) {
        let counter = if delivered {
            &self.delivered
        } else {
            &self.dropped
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for InMemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("InMemoryNetwork")
            .field("routes", &state.routes.len())
            .field("isolated", &state.isolated)
            .field("delay", &state.delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::routing::PartitionId;
    use crate::raft::rpc::{RaftMessage, RequestVoteRequest};

    fn envelope(from: &str, to: &str) -> Envelope {
        Envelope {
            partition: PartitionKey::new("r", PartitionId(1)),
            from: MemberId::new(from),
            to: MemberId::new(to),
            message: RaftMessage::RequestVote(RequestVoteRequest {
                term: 1,
                last_log_index: 0,
                last_log_term: 0,
            }),
        }
    }

    #[test]
    fn unroutable_messages_are_dropped() {
        let network = InMemoryNetwork::new();
        network.send(envelope("a", "b"));
        assert_eq!(network.stats(), NetworkStats { delivered: 0, dropped: 1 });
    }

    #[test]
    fn isolation_and_links_control_reachability() {
        let network = InMemoryNetwork::new();
        let (a, b, c) = (MemberId::new("a"), MemberId::new("b"), MemberId::new("c"));
        let state = || network.state.read();

        network.isolate(&a);
        assert!(!state().reachable(&a, &b));
        assert!(!state().reachable(&c, &a));
        assert!(state().reachable(&b, &c));

        network.heal(&a);
        network.block_link(&b, &c);
        assert!(state().reachable(&a, &b));
        assert!(!state().reachable(&c, &b));

        network.heal_all();
        assert!(state().reachable(&b, &c));
    }
}
