//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides, StorageBackend};
use crate::core::runtime::Runtime;
use crate::partition::InMemoryNetwork;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;
use std::time::Duration;

/// Interval between partition status reports.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Run configured members until interrupted.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Host only this member.
    #[arg(long)]
    pub member: Option<String>,

    /// Storage backend (memory, file).
    #[arg(long)]
    pub storage: Option<StorageBackend>,

    /// Storage directory for the file backend.
    #[arg(long)]
    pub storage_dir: Option<String>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the start command with the given config path.
pub async fn run_start_with_config(
    config_path: &Path,
    log_level: Option<String>,
    args: StartArgs,
) -> Result<()> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        storage_dir: args.storage_dir,
        storage_backend: args.storage,
        local_member: args.member,
    });
    config.validate().context("invalid configuration after overrides")?;

    init_tracing(&config.telemetry.log_level);

    let network = InMemoryNetwork::new();
    let mut runtimes = start_members(&config, &network).await?;

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
                break;
            }
            _ = ticker.tick() => {
                for runtime in runtimes.iter_mut() {
                    for status in runtime.partition_status().await {
                        tracing::info!(
                            member = %status.id,
                            partition = %status.partition,
                            role = %status.role,
                            term = status.term,
                            commit_index = status.commit_index,
                            applied_index = status.applied_index,
                            "partition status"
                        );
                    }
                }
            }
        }
    }

    for runtime in runtimes.iter_mut() {
        runtime.stop().await?;
    }
    Ok(())
}

/// Start a runtime per hosted member and open every declared resource.
pub(crate) async fn start_members(
    config: &Config,
    network: &InMemoryNetwork,
) -> Result<Vec<Runtime>> {
    let membership = config.membership()?;
    let resources = config
        .resource_configs()?
        .iter()
        .map(|resource| resource.resolve(&membership))
        .collect::<Result<Vec<_>>>()?;

    let mut runtimes = Vec::new();
    for member in config.hosted_members() {
        let mut runtime = Runtime::from_config(config, member, network.clone())?;
        runtime.start().await?;
        for resource in &resources {
            runtime.open_resource(resource)?;
        }
        runtimes.push(runtime);
    }

    tracing::info!(
        members = runtimes.len(),
        resources = resources.len(),
        "cluster members started"
    );
    Ok(runtimes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_every_member_with_resources() {
        let config = Config::from_toml(
            r#"
[cluster]
members = [
  { id = "a", address = "local" },
  { id = "b", address = "local" },
  { id = "c", address = "local", role = "passive" },
]

[raft]
election_timeout_ms = 60
heartbeat_interval_ms = 20

[[resources]]
name = "leader-flag"
type = "atomic_value"

[[resources]]
name = "groups"
type = "multi_map"
partitions = 2
"#,
        )
        .unwrap();

        let network = InMemoryNetwork::new();
        let mut runtimes = start_members(&config, &network).await.unwrap();
        assert_eq!(runtimes.len(), 3);

        let names: Vec<_> = runtimes[0].resource_names().collect();
        assert_eq!(names, vec!["groups", "leader-flag"]);

        // Passive members route everything remotely.
        assert!(runtimes[2].partition_status().await.is_empty());
        assert_eq!(runtimes[0].partition_status().await.len(), 3);

        for runtime in runtimes.iter_mut() {
            runtime.stop().await.unwrap();
        }
    }
}
