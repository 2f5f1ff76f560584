//! Configuration CLI commands.
//!
//! Commands for viewing the effective configuration.

use clap::Subcommand;

use crate::config::Config;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// List all settings and their current values
    List {
        /// Show only settings matching this prefix (e.g., "JOBVISOR_HEARTBEAT")
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Get a specific setting value
    Get {
        /// Environment key (e.g., "JOBVISOR_YIELD_MS")
        key: String,
    },
}

/// Run a config command.
pub fn run_config_command(cmd: ConfigCommand) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    match cmd {
        ConfigCommand::List { filter } => list_settings(&config, filter.as_deref()),
        ConfigCommand::Get { key } => get_setting(&config, &key),
    }
}

fn list_settings(config: &Config, filter: Option<&str>) -> anyhow::Result<()> {
    let all = config.entries();

    // Find the longest key for alignment
    let max_key_len = all.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    println!("Settings:");
    println!();

    for (key, value) in all {
        if filter.is_some_and(|f| !key.starts_with(f)) {
            continue;
        }
        println!("  {:width$}  {}", key, value, width = max_key_len);
    }

    Ok(())
}

fn get_setting(config: &Config, key: &str) -> anyhow::Result<()> {
    match config.entries().into_iter().find(|(k, _)| *k == key) {
        Some((_, value)) => {
            println!("{}", value);
            Ok(())
        }
        None => anyhow::bail!("Unknown setting: {}", key),
    }
}
