//! Configuration parsing and validation.
//!
//! Trellis configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the runtime's components: cluster membership, consensus
//! timing, log storage, client behavior, telemetry and declared resources.

use crate::control::membership::{ClusterMember, ClusterMembership, MemberId, MemberRole};
use crate::core::time::{TimingConfig, MIN_ELECTION_TICKS};
use crate::resource::config::ResourceConfig;
use crate::resource::state_machine::ResourceType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster membership.
    pub cluster: ClusterConfig,

    /// Consensus timing and log management.
    #[serde(default)]
    pub raft: RaftConfig,

    /// Log storage backend.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Client-facing operation behavior.
    #[serde(default)]
    pub client: ClientConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Resources opened at startup.
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
}

/// Cluster membership configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Member hosted by this process. All members are hosted when unset.
    #[serde(default)]
    pub local_member: Option<String>,

    /// Every member of the cluster.
    pub members: Vec<MemberConfig>,
}

/// One cluster member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub role: MemberRole,
}

/// Consensus configuration shared by every partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Base election timeout in milliseconds.
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Applied entries beyond the last snapshot that trigger a new one (0 disables).
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,

    /// Maximum entries per append message.
    #[serde(default = "default_max_append_entries")]
    pub max_append_entries: usize,

    /// Leaders step down when a quorum goes silent.
    #[serde(default = "default_check_quorum")]
    pub check_quorum: bool,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: default_election_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            snapshot_threshold: default_snapshot_threshold(),
            max_append_entries: default_max_append_entries(),
            check_quorum: default_check_quorum(),
        }
    }
}

impl RaftConfig {
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            election_timeout_ms: self.election_timeout_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
        }
    }
}

/// Log storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile storage; state survives only while the process runs.
    #[default]
    Memory,
    /// Record log and snapshot files under `storage.dir`.
    File,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => anyhow::bail!("storage backend must be 'memory' or 'file', got: {}", other),
        }
    }
}

/// Log storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the file backend.
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: default_storage_dir(),
        }
    }
}

impl StorageConfig {
    /// Directory holding one partition replica's files.
    pub fn partition_dir(&self, member: &MemberId, resource: &str, partition: u32) -> PathBuf {
        Path::new(&self.dir)
            .join(member.as_str())
            .join(resource)
            .join(format!("p{partition}"))
    }
}

/// Client operation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Time after which a pending operation resolves to Timeout.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Declared resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub name: String,

    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    #[serde(default = "default_partitions")]
    pub partitions: u32,

    #[serde(default)]
    pub replication_factor: Option<usize>,
}

// Default value functions

fn default_election_timeout_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    100
}

fn default_snapshot_threshold() -> u64 {
    1_000
}

fn default_max_append_entries() -> usize {
    64
}

fn default_check_quorum() -> bool {
    true
}

fn default_storage_dir() -> String {
    "data".to_string()
}

fn default_operation_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_partitions() -> u32 {
    1
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref storage_dir) = overrides.storage_dir {
            self.storage.dir = storage_dir.clone();
        }
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(ref member) = overrides.local_member {
            self.cluster.local_member = Some(member.clone());
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_cluster()?;
        self.validate_raft()?;
        self.validate_client()?;
        self.validate_telemetry()?;
        self.validate_resources()?;
        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        if self.cluster.members.is_empty() {
            anyhow::bail!("cluster.members cannot be empty");
        }
        let mut seen = HashSet::new();
        for member in &self.cluster.members {
            if member.id.is_empty() {
                anyhow::bail!("cluster.members entries need a non-empty id");
            }
            if !seen.insert(member.id.as_str()) {
                anyhow::bail!("duplicate cluster member: {}", member.id);
            }
        }
        if !self
            .cluster
            .members
            .iter()
            .any(|m| m.role == MemberRole::Active)
        {
            anyhow::bail!("cluster.members needs at least one active member");
        }
        if let Some(ref local) = self.cluster.local_member {
            if !seen.contains(local.as_str()) {
                anyhow::bail!("cluster.local_member '{}' is not a cluster member", local);
            }
        }
        Ok(())
    }

    fn validate_raft(&self) -> Result<()> {
        self.raft
            .timing()
            .validate()
            .with_context(|| {
                format!(
                    "raft timing needs at least {MIN_ELECTION_TICKS} heartbeats per election timeout"
                )
            })?;
        if self.raft.max_append_entries == 0 {
            anyhow::bail!("raft.max_append_entries must be > 0");
        }
        Ok(())
    }

    fn validate_client(&self) -> Result<()> {
        if self.client.operation_timeout_ms == 0 {
            anyhow::bail!("client.operation_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    fn validate_resources(&self) -> Result<()> {
        let active = self
            .cluster
            .members
            .iter()
            .filter(|m| m.role == MemberRole::Active)
            .count();
        let mut names = HashSet::new();
        for resource in &self.resources {
            if !names.insert(resource.name.as_str()) {
                anyhow::bail!("duplicate resource: {}", resource.name);
            }
            if let Some(factor) = resource.replication_factor {
                if factor > active {
                    anyhow::bail!(
                        "resource '{}' replication_factor ({}) exceeds active members ({})",
                        resource.name,
                        factor,
                        active
                    );
                }
            }
        }
        self.resource_configs().map(|_| ())
    }

    /// Membership snapshot for resolving resources.
    pub fn membership(&self) -> Result<ClusterMembership> {
        ClusterMembership::new(
            self.cluster
                .members
                .iter()
                .map(|m| ClusterMember {
                    id: MemberId::new(m.id.clone()),
                    address: m.address.clone(),
                    role: m.role,
                })
                .collect(),
        )
    }

    /// Members this process hosts.
    pub fn hosted_members(&self) -> Vec<MemberId> {
        match self.cluster.local_member {
            Some(ref local) => vec![MemberId::new(local.clone())],
            None => self
                .cluster
                .members
                .iter()
                .map(|m| MemberId::new(m.id.clone()))
                .collect(),
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.client.operation_timeout_ms)
    }

    /// Validated resource declarations with this configuration's timing.
    pub fn resource_configs(&self) -> Result<Vec<ResourceConfig>> {
        self.resources
            .iter()
            .map(|entry| {
                let config = ResourceConfig {
                    name: entry.name.clone(),
                    resource_type: entry.resource_type,
                    partitions: entry.partitions,
                    replication_factor: entry.replication_factor,
                    timing: self.raft.timing(),
                    operation_timeout: self.operation_timeout(),
                };
                config
                    .validate()
                    .with_context(|| format!("invalid resource '{}'", entry.name))?;
                Ok(config)
            })
            .collect()
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override storage directory.
    pub storage_dir: Option<String>,
    /// Override storage backend.
    pub storage_backend: Option<StorageBackend>,
    /// Host only this member.
    pub local_member: Option<String>,
}
