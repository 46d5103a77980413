//! Per-member runtime orchestration.
//!
//! A [`Runtime`] hosts every partition replica assigned to one cluster
//! member. Opening a resource starts one driver task per hosted partition:
//! - Start order: storage → consensus replica → driver task → network route
//! - Shutdown order: network routes → driver tasks → storage

use crate::control::membership::MemberId;
use crate::control::routing::{PartitionId, PartitionKey};
use crate::core::config::{Config, RaftConfig, StorageBackend, StorageConfig};
use crate::partition::{spawn_partition, InMemoryNetwork, PartitionCoordinator, PartitionHandle};
use crate::raft::node::{NodeConfig, NodeStatus, RaftNode};
use crate::resource::config::{CoordinatedResourceConfig, PartitionConfig};
use crate::resource::facade::{PartitionRoute, ResourceHandle};
use crate::resource::registry::ResourceRegistry;
use crate::storage::{FileLogStorage, LogStorage, MemoryLogStorage};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use twox_hash::XxHash64;

/// Time allowed for a driver task to exit after shutdown is signalled.
const DRIVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Log storage health.
    pub storage: ComponentHealth,
    /// Partition driver health.
    pub partitions: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            storage: ComponentHealth::Starting,
            partitions: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.storage, self.partitions),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy | ComponentHealth::Degraded
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.storage, self.partitions),
            (ComponentHealth::Failed, _) | (_, ComponentHealth::Failed)
        )
    }
}

/// A partition replica running on this member.
struct HostedPartition {
    handle: PartitionHandle,
    task: JoinHandle<()>,
}

/// A resource opened on this member.
struct OpenResource {
    handle: ResourceHandle,
    partitions: Vec<HostedPartition>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runtime hosting one member's partition replicas.
pub struct Runtime {
    /// Member this runtime hosts.
    member: MemberId,

    /// Consensus settings shared by every partition.
    raft: RaftConfig,

    /// Storage settings.
    storage: StorageConfig,

    /// State machine constructors.
    registry: ResourceRegistry,

    /// Network shared with the other members.
    network: InMemoryNetwork,

    /// Memory-backed logs, kept so a reopened partition recovers its state.
    memory_logs: HashMap<PartitionKey, MemoryLogStorage>,

    /// Open resources by name.
    resources: BTreeMap<String, OpenResource>,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a runtime for `member` from explicit settings.
    pub fn new(
        member: MemberId,
        raft: RaftConfig,
        storage: StorageConfig,
        network: InMemoryNetwork,
    ) -> Result<Self> {
        raft.timing().validate().context("invalid raft timing")?;
        if raft.max_append_entries == 0 {
            anyhow::bail!("raft.max_append_entries must be > 0");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            member,
            raft,
            storage,
            registry: ResourceRegistry::with_defaults(),
            network,
            memory_logs: HashMap::new(),
            resources: BTreeMap::new(),
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Create a runtime for `member` from a validated configuration.
    pub fn from_config(
        config: &Config,
        member: MemberId,
        network: InMemoryNetwork,
    ) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        if !config.cluster.members.iter().any(|m| m.id == member.as_str()) {
            anyhow::bail!("member '{}' is not part of the configured cluster", member);
        }
        Self::new(member, config.raft.clone(), config.storage.clone(), network)
    }

    /// Replace the state machine registry.
    pub fn with_registry(mut self, registry: ResourceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn member(&self) -> &MemberId {
        &self.member
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Prepare storage and mark the runtime as running.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            member = %self.member,
            backend = ?self.storage.backend,
            "starting Trellis runtime"
        );

        self.init_storage()?;
        self.health.partitions = ComponentHealth::Healthy;
        self.running.store(true, Ordering::Release);

        tracing::info!(member = %self.member, "Trellis runtime started");
        Ok(())
    }

    fn init_storage(&mut self) -> Result<()> {
        if self.storage.backend == StorageBackend::File {
            let dir = std::path::Path::new(&self.storage.dir).join(self.member.as_str());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create storage directory: {}", dir.display()))?;
        }
        self.health.storage = ComponentHealth::Healthy;
        Ok(())
    }

    /// Open a resolved resource, starting a driver for each partition this
    /// member replicates. Opening an already open resource returns its handle.
    pub fn open_resource(&mut self, config: &CoordinatedResourceConfig) -> Result<ResourceHandle> {
        if !self.is_running() {
            anyhow::bail!("runtime for member '{}' is not running", self.member);
        }
        if let Some(open) = self.resources.get(&config.name) {
            if open.handle.resource_type() != config.resource_type {
                anyhow::bail!(
                    "resource '{}' is already open as {}",
                    config.name,
                    open.handle.resource_type()
                );
            }
            return Ok(open.handle.clone());
        }
        if !self.registry.contains(config.resource_type) {
            anyhow::bail!("no state machine registered for {}", config.resource_type);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut routes = Vec::with_capacity(config.partitions.len());
        let mut hosted: Vec<HostedPartition> = Vec::new();

        for partition in &config.partitions {
            let key = config.partition_key(partition.partition);
            if !partition.replicas.contains(&self.member) {
                routes.push(PartitionRoute::Remote {
                    key,
                    replicas: partition.replicas.clone(),
                });
                continue;
            }

            let result = self
                .start_partition(config, partition, key.clone(), shutdown_rx.clone())
                .with_context(|| format!("failed to start partition {} on {}", key, self.member));
            let (handle, task) = match result {
                Ok(started) => started,
                Err(e) => {
                    let _ = shutdown_tx.send(true);
                    for started in &hosted {
                        self.network
                            .unregister(started.handle.member(), started.handle.key());
                    }
                    self.health.partitions = ComponentHealth::Degraded;
                    return Err(e);
                }
            };
            self.network.register(handle.clone());
            routes.push(PartitionRoute::Local(handle.clone()));
            hosted.push(HostedPartition { handle, task });
        }

        let handle = ResourceHandle::new(config, routes)
            .with_context(|| format!("failed to build handle for '{}'", config.name))?;

        tracing::info!(
            member = %self.member,
            resource = %config.name,
            resource_type = %config.resource_type,
            partitions = config.partitions.len(),
            hosted = hosted.len(),
            "resource opened"
        );

        self.resources.insert(
            config.name.clone(),
            OpenResource {
                handle: handle.clone(),
                partitions: hosted,
                shutdown_tx,
            },
        );
        Ok(handle)
    }

    fn start_partition(
        &mut self,
        config: &CoordinatedResourceConfig,
        partition: &PartitionConfig,
        key: PartitionKey,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(PartitionHandle, JoinHandle<()>)> {
        let storage = self.log_storage(&key, &config.name, partition.partition)?;
        let node = RaftNode::new(
            NodeConfig {
                id: self.member.clone(),
                partition: key.clone(),
                replicas: partition.replicas.clone(),
                election_ticks: partition.timing.election_ticks(),
                heartbeat_ticks: partition.timing.heartbeat_ticks(),
                max_append_entries: self.raft.max_append_entries,
                check_quorum: self.raft.check_quorum,
                seed: election_seed(&self.member, &key),
            },
            storage,
        )?;
        let state_machine = self.registry.create(config.resource_type)?;
        let coordinator =
            PartitionCoordinator::new(node, state_machine, self.raft.snapshot_threshold);

        tracing::debug!(
            member = %self.member,
            partition = %key,
            replicas = partition.replicas.len(),
            "starting partition driver"
        );
        Ok(spawn_partition(
            coordinator,
            Arc::new(self.network.clone()),
            partition.timing.tick_interval(),
            shutdown,
        ))
    }

    fn log_storage(
        &mut self,
        key: &PartitionKey,
        resource: &str,
        partition: PartitionId,
    ) -> Result<Box<dyn LogStorage>> {
        match self.storage.backend {
            StorageBackend::Memory => {
                let storage = self.memory_logs.entry(key.clone()).or_default().clone();
                Ok(Box::new(storage))
            }
            StorageBackend::File => {
                let dir = self.storage.partition_dir(&self.member, resource, partition.0);
                let storage = FileLogStorage::open(&dir)
                    .with_context(|| format!("failed to open log storage at {}", dir.display()))?;
                Ok(Box::new(storage))
            }
        }
    }

    /// Handle of an open resource.
    pub fn resource(&self, name: &str) -> Option<&ResourceHandle> {
        self.resources.get(name).map(|open| &open.handle)
    }

    /// Names of open resources.
    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Local replica of one partition, if hosted here.
    pub fn partition(&self, key: &PartitionKey) -> Option<&PartitionHandle> {
        self.resources
            .values()
            .flat_map(|open| open.partitions.iter())
            .map(|hosted| &hosted.handle)
            .find(|handle| handle.key() == key)
    }

    /// Status of every hosted partition replica.
    pub async fn partition_status(&mut self) -> Vec<NodeStatus> {
        let handles: Vec<PartitionHandle> = self
            .resources
            .values()
            .flat_map(|open| open.partitions.iter().map(|hosted| hosted.handle.clone()))
            .collect();

        let mut statuses = Vec::with_capacity(handles.len());
        let mut stopped = 0usize;
        for handle in handles {
            match handle.status().await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    stopped += 1;
                    tracing::warn!(
                        partition = %handle.key(),
                        error = %e,
                        "partition not responding"
                    );
                }
            }
        }
        if stopped > 0 && self.is_running() {
            self.health.partitions = ComponentHealth::Degraded;
        }
        statuses
    }

    /// Stop a resource's drivers and release its network routes.
    pub async fn close_resource(&mut self, name: &str) -> Result<()> {
        let open = self
            .resources
            .remove(name)
            .with_context(|| format!("resource '{}' is not open", name))?;
        self.stop_resource(name, open).await;
        Ok(())
    }

    async fn stop_resource(&self, name: &str, open: OpenResource) {
        for hosted in &open.partitions {
            self.network
                .unregister(hosted.handle.member(), hosted.handle.key());
        }
        let _ = open.shutdown_tx.send(true);
        for hosted in open.partitions {
            let key = hosted.handle.key().clone();
            match tokio::time::timeout(DRIVER_STOP_TIMEOUT, hosted.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(partition = %key, error = %e, "driver task panicked"),
                Err(_) => tracing::warn!(partition = %key, "driver stop timed out"),
            }
        }
        tracing::info!(member = %self.member, resource = %name, "resource closed");
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!(member = %self.member, "shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Stop all hosted partitions.
    ///
    /// Routes are removed before drivers stop so peers see this member as
    /// unreachable rather than half-alive.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!(member = %self.member, "stopping Trellis runtime");
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        self.health.partitions = ComponentHealth::Stopping;
        let resources = std::mem::take(&mut self.resources);
        for (name, open) in resources {
            self.stop_resource(&name, open).await;
        }
        self.health.partitions = ComponentHealth::Stopped;

        self.health.storage = ComponentHealth::Stopping;
        self.memory_logs.clear();
        self.health.storage = ComponentHealth::Stopped;

        tracing::info!(member = %self.member, "Trellis runtime stopped");
        Ok(())
    }

    /// Stop drivers without discarding memory-backed logs, so the runtime
    /// can be started again and recover every replica.
    pub async fn suspend(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let resources = std::mem::take(&mut self.resources);
        for (name, open) in resources {
            self.stop_resource(&name, open).await;
        }
        self.health.partitions = ComponentHealth::Stopped;
        tracing::info!(member = %self.member, "Trellis runtime suspended");
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("member", &self.member)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("health", &self.health)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Per-replica seed so replicas of one partition draw different timeouts.
fn election_seed(member: &MemberId, partition: &PartitionKey) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(member.as_str().as_bytes());
    hasher.write(&[0xff]);
    hasher.write(partition.to_string().as_bytes());
    hasher.finish()
}
