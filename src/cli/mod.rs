//! Command-line interface.

mod config;
mod run;

use clap::{Parser, Subcommand};

pub use config::{ConfigCommand, run_config_command};
pub use run::{RunArgs, run_command};

/// Supervise shell jobs for autonomous agents
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command under supervision and follow it to completion
    Run(RunArgs),

    /// Inspect the effective configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}
