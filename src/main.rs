//! Trellis - unified CLI entrypoint.
//!
//! Usage:
//!   trellis start --config config/trellis.toml
//!   trellis config validate --config config/trellis.toml
//!   trellis inspect wal <partition-dir-or-wal-file>...

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use trellis::cli::commands::{run_config, run_inspect, run_start_with_config};
use trellis::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/trellis.toml"));

    match cli.command {
        Commands::Start(args) => run_start_with_config(&config_path, cli.log_level, args).await,
        Commands::Config(args) => run_config(args),
        Commands::Inspect(args) => run_inspect(args),
    }
}
