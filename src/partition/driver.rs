//! Async driver owning one partition coordinator.
//!
//! Each hosted partition runs as its own tokio task. The task is the only
//! owner of its [`PartitionCoordinator`]; clients and the transport reach it
//! through a [`PartitionHandle`] that enqueues [`PartitionEvent`]s. After
//! every tick or event the driver drains the coordinator and hands outgoing
//! messages to the transport, so replication never blocks a client task.

use super::coordinator::PartitionCoordinator;
use super::transport::Transport;
use crate::control::membership::MemberId;
use crate::control::routing::PartitionKey;
use crate::core::error::{TrellisError, TrellisResult};
use crate::raft::node::NodeStatus;
use crate::raft::rpc::Envelope;
use crate::resource::completion::{completion_pair, raw, unit, CompletionHandle, Responder};
use crate::resource::state_machine::Command;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Work item for a partition driver.
#[derive(Debug)]
pub enum PartitionEvent {
    Submit {
        command: Command,
        responder: Responder,
    },
    Query {
        query: Bytes,
        responder: Responder,
    },
    Reconfigure {
        replicas: Vec<MemberId>,
        responder: Responder,
    },
    Message(Envelope),
    Status(oneshot::Sender<NodeStatus>),
}

impl PartitionEvent {
    /// Resolve the event's responder with `error`, if it has one.
    fn fail(self, error: TrellisError) {
        match self {
            Self::Submit { responder, .. }
            | Self::Query { responder, .. }
            | Self::Reconfigure { responder, .. } => {
                let _ = responder.send(Err(error));
            }
            Self::Message(_) | Self::Status(_) => {}
        }
    }
}

/// Cloneable entry point into a running partition.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    key: PartitionKey,
    member: MemberId,
    tx: mpsc::UnboundedSender<PartitionEvent>,
}

impl PartitionHandle {
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Member hosting this replica.
    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn dispatch(&self, event: PartitionEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            event.fail(TrellisError::unavailable(format!(
                "partition {} is not running on {}",
                self.key, self.member
            )));
        }
    }

    pub fn submit(&self, command: Command) -> CompletionHandle<Bytes> {
        let (responder, handle) = completion_pair(raw);
        self.submit_with(command, responder);
        handle
    }

    pub fn submit_with(&self, command: Command, responder: Responder) {
        self.dispatch(PartitionEvent::Submit { command, responder });
    }

    pub fn query(&self, query: Bytes) -> CompletionHandle<Bytes> {
        let (responder, handle) = completion_pair(raw);
        self.query_with(query, responder);
        handle
    }

    pub fn query_with(&self, query: Bytes, responder: Responder) {
        self.dispatch(PartitionEvent::Query { query, responder });
    }

    /// Replace the replica set. Only single-member changes are accepted.
    pub fn reconfigure(&self, replicas: Vec<MemberId>) -> CompletionHandle<()> {
        let (responder, handle) = completion_pair(unit);
        self.dispatch(PartitionEvent::Reconfigure {
            replicas,
            responder,
        });
        handle
    }

    /// Hand a peer message to the partition. Returns false if it has stopped.
    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.tx.send(PartitionEvent::Message(envelope)).is_ok()
    }

    pub async fn status(&self) -> TrellisResult<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(PartitionEvent::Status(tx));
        rx.await.map_err(|_| {
            TrellisError::unavailable(format!("partition {} is not running", self.key))
        })
    }
}

/// Start a driver task for `coordinator`.
///
/// The task runs until `shutdown` flips to true or every handle is dropped.
pub fn spawn_partition(
    coordinator: PartitionCoordinator,
    transport: Arc<dyn Transport>,
    tick_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> (PartitionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = PartitionHandle {
        key: coordinator.node().partition().clone(),
        member: coordinator.node().id().clone(),
        tx,
    };
    let driver = PartitionDriver {
        coordinator,
        inbox: rx,
        transport,
        tick_interval,
        shutdown,
    };
    let task = tokio::spawn(driver.run());
    (handle, task)
}

struct PartitionDriver {
    coordinator: PartitionCoordinator,
    inbox: mpsc::UnboundedReceiver<PartitionEvent>,
    transport: Arc<dyn Transport>,
    tick_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl PartitionDriver {
    async fn run(mut self) {
        let partition = self.coordinator.node().partition().clone();
        let member = self.coordinator.node().id().clone();
        tracing::debug!(%partition, %member, "partition driver started");

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let outcome = tokio::select! {
                _ = ticker.tick() => self.coordinator.tick(),
                event = self.inbox.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let flushed = outcome.and_then(|()| self.coordinator.drain());
            match flushed {
                Ok(messages) => {
                    for message in messages {
                        self.transport.send(message);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        %partition,
                        %member,
                        error = %format!("{e:#}"),
                        "replica halted after local failure"
                    );
                    self.coordinator
                        .fail_pending(TrellisError::internal(format!("replica failed: {e}")));
                    break;
                }
            }
        }

        self.coordinator
            .fail_pending(TrellisError::unavailable("partition shut down"));
        self.inbox.close();
        while let Ok(event) = self.inbox.try_recv() {
            event.fail(TrellisError::unavailable("partition shut down"));
        }
        tracing::debug!(%partition, %member, "partition driver stopped");
    }

    fn handle_event(&mut self, event: PartitionEvent) -> anyhow::Result<()> {
        match event {
            PartitionEvent::Submit { command, responder } => {
                self.coordinator.submit_with(command, responder);
            }
            PartitionEvent::Query { query, responder } => {
                self.coordinator.query_with(query, responder);
            }
            PartitionEvent::Reconfigure {
                replicas,
                responder,
            } => {
                self.coordinator.reconfigure_with(replicas, responder);
            }
            PartitionEvent::Message(envelope) => return self.coordinator.step(envelope),
            PartitionEvent::Status(reply) => {
                let _ = reply.send(self.coordinator.status());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::routing::PartitionId;
    use crate::partition::transport::InMemoryNetwork;
    use crate::raft::election::Role;
    use crate::raft::node::{NodeConfig, RaftNode};
    use crate::resource::atomic_value::{AtomicValueCommand, AtomicValueStateMachine};
    use crate::resource::state_machine::{decode, ResourceType};
    use crate::storage::MemoryLogStorage;

    fn single_replica() -> PartitionCoordinator {
        let node = RaftNode::new(
            NodeConfig {
                id: MemberId::new("solo"),
                partition: PartitionKey::new("value", PartitionId(1)),
                replicas: vec![MemberId::new("solo")],
                election_ticks: 3,
                heartbeat_ticks: 1,
                max_append_entries: 16,
                check_quorum: false,
                seed: 3,
            },
            Box::new(MemoryLogStorage::new()),
        )
        .unwrap();
        PartitionCoordinator::new(node, Box::new(AtomicValueStateMachine::new()), 0)
    }

    #[tokio::test]
    async fn driver_elects_and_applies() {
        let network = InMemoryNetwork::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, _task) = spawn_partition(
            single_replica(),
            Arc::new(network),
            Duration::from_millis(5),
            shutdown_rx,
        );

        let command = Command::encode(
            ResourceType::AtomicValue,
            &AtomicValueCommand::Set {
                value: Some(Bytes::from_static(b"v")),
            },
        )
        .unwrap();
        let mut result = Err(TrellisError::Timeout);
        for _ in 0..100 {
            result = handle.submit(command.clone()).await;
            if result.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let previous: Option<Bytes> = decode(&result.unwrap()).unwrap();
        assert_eq!(previous, None);

        let status = handle.status().await.unwrap();
        assert_eq!(status.role, Role::Leader);
        assert!(status.commit_index >= 2);
    }

    #[tokio::test]
    async fn stopped_driver_reports_unavailable() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (handle, task) = spawn_partition(
            single_replica(),
            Arc::new(InMemoryNetwork::new()),
            Duration::from_millis(5),
            shutdown_rx,
        );
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let result = handle.query(Bytes::new()).await;
        assert!(matches!(result, Err(TrellisError::Unavailable { .. })));
        assert!(handle.status().await.is_err());
    }
}
