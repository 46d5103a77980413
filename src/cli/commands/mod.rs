//! CLI command implementations.

mod config;
mod inspect;
mod start;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use inspect::{describe_record, run_inspect, InspectArgs, InspectCommand};
pub use start::{run_start_with_config, StartArgs};
