//! Config command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/trellis.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults applied.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/trellis.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    let membership = config.membership()?;

    println!("✓ Configuration is valid");
    println!(
        "  members: {} ({} active)",
        membership.len(),
        membership.replica_candidates().len()
    );
    for resource in config.resource_configs()? {
        let resolved = resource
            .resolve(&membership)
            .with_context(|| format!("failed to resolve resource '{}'", resource.name))?;
        println!(
            "  resource {} ({}): {} partition(s)",
            resolved.name,
            resolved.resource_type,
            resolved.partition_count()
        );
        for partition in &resolved.partitions {
            let replicas: Vec<&str> = partition.replicas.iter().map(|m| m.as_str()).collect();
            println!(
                "    {}: [{}]",
                resolved.partition_key(partition.partition),
                replicas.join(", ")
            );
        }
    }
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    let config = Config::from_file(path)?;
    let rendered = match format {
        "json" => serde_json::to_string_pretty(&config)?,
        "toml" => toml::to_string_pretty(&config)?,
        other => anyhow::bail!("unknown format '{}', expected toml or json", other),
    };
    println!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn validates_and_shows_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[cluster]\nmembers = [{{ id = \"a\", address = \"x\" }}]\n\n[[resources]]\nname = \"m\"\ntype = \"multi_map\"\npartitions = 2\n"
        )
        .unwrap();

        assert!(validate_config(file.path()).is_ok());
        assert!(show_config(file.path(), "json").is_ok());
        assert!(show_config(file.path(), "toml").is_ok());
        assert!(show_config(file.path(), "yaml").is_err());
    }

    #[test]
    fn missing_file_fails() {
        assert!(validate_config(Path::new("/nonexistent/trellis.toml")).is_err());
    }
}
