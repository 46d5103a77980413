//! Command-line interface.
//!
//! Unified CLI for running and inspecting a Trellis cluster.

pub mod commands;

use clap::{Parser, Subcommand};

/// Trellis - replicated resource coordination.
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured cluster members in-process.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Inspect file-backed logs.
    Inspect(commands::InspectArgs),
}
