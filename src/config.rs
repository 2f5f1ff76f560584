//! Environment-driven configuration.
//!
//! Values are read from `JOBVISOR_*` variables, after loading a `.env` file
//! if one is present. Every value has a default, so an empty environment
//! yields a working configuration.

use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub jobs: JobsConfig,
    pub heartbeat: HeartbeatSettings,
    /// Capacity of the wake bridge queue.
    pub wake_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: JobsConfig::default(),
            heartbeat: HeartbeatSettings::default(),
            wake_queue_capacity: 256,
        }
    }
}

/// Job supervision settings.
#[derive(Debug, Clone, Serialize)]
pub struct JobsConfig {
    /// Grace period a foreground submission waits before backgrounding.
    pub default_yield: Duration,
    /// Timeout applied when a submission does not name one.
    pub default_timeout: Duration,
    /// Per-stream output cap in bytes.
    pub max_output_bytes: usize,
    /// Size of the combined preview tail in bytes.
    pub tail_bytes: usize,
    /// Resource sampling cadence.
    pub sample_interval: Duration,
    /// How often the sweeper looks for stale finished jobs.
    pub sweep_interval: Duration,
    /// How long a finished job stays queryable.
    pub finished_ttl: Duration,
    /// Shell used to run commands (`<shell> -c <command>`).
    pub shell: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_yield: Duration::from_millis(10_000),
            default_timeout: Duration::from_secs(30 * 60),
            max_output_bytes: 200_000,
            tail_bytes: 2_000,
            sample_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            finished_ttl: Duration::from_secs(30 * 60),
            shell: "sh".to_string(),
        }
    }
}

/// Heartbeat tick settings shared by all agents.
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatSettings {
    /// Identical output inside this window is not redelivered.
    pub dedup_window: Duration,
    /// Replies carrying the ack token and at most this many chars are silent.
    pub ack_max_chars: usize,
    /// Interval used for agents that do not configure one.
    pub default_interval: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(24 * 60 * 60),
            ack_max_chars: 300,
            default_interval: Duration::from_secs(30 * 60),
        }
    }
}

impl Config {
    /// Load configuration from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Failed to load .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = JobsConfig::default();
        let jobs = JobsConfig {
            default_yield: parse_or(&lookup, "JOBVISOR_YIELD_MS", defaults.default_yield, |v| {
                u64::from_str(v).map(Duration::from_millis)
            })?,
            default_timeout: parse_or(
                &lookup,
                "JOBVISOR_JOB_TIMEOUT_SECS",
                defaults.default_timeout,
                secs,
            )?,
            max_output_bytes: parse_or(
                &lookup,
                "JOBVISOR_MAX_OUTPUT_BYTES",
                defaults.max_output_bytes,
                usize::from_str,
            )?,
            tail_bytes: parse_or(
                &lookup,
                "JOBVISOR_TAIL_BYTES",
                defaults.tail_bytes,
                usize::from_str,
            )?,
            sample_interval: parse_or(
                &lookup,
                "JOBVISOR_SAMPLE_INTERVAL_MS",
                defaults.sample_interval,
                |v| u64::from_str(v).map(Duration::from_millis),
            )?,
            sweep_interval: parse_or(
                &lookup,
                "JOBVISOR_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval,
                secs,
            )?,
            finished_ttl: parse_or(
                &lookup,
                "JOBVISOR_FINISHED_TTL_SECS",
                defaults.finished_ttl,
                secs,
            )?,
            shell: lookup("JOBVISOR_SHELL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.shell),
        };

        if jobs.max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "JOBVISOR_MAX_OUTPUT_BYTES".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if jobs.sample_interval.is_zero() || jobs.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "JOBVISOR_SAMPLE_INTERVAL_MS/JOBVISOR_SWEEP_INTERVAL_SECS".to_string(),
                message: "intervals must be greater than zero".to_string(),
            });
        }

        let hb_defaults = HeartbeatSettings::default();
        let heartbeat = HeartbeatSettings {
            dedup_window: parse_or(
                &lookup,
                "JOBVISOR_HEARTBEAT_DEDUP_SECS",
                hb_defaults.dedup_window,
                secs,
            )?,
            ack_max_chars: parse_or(
                &lookup,
                "JOBVISOR_HEARTBEAT_ACK_MAX_CHARS",
                hb_defaults.ack_max_chars,
                usize::from_str,
            )?,
            default_interval: parse_or(
                &lookup,
                "JOBVISOR_HEARTBEAT_INTERVAL_SECS",
                hb_defaults.default_interval,
                secs,
            )?,
        };

        let wake_queue_capacity =
            parse_or(&lookup, "JOBVISOR_WAKE_QUEUE", 256, usize::from_str)?.max(1);

        Ok(Self {
            jobs,
            heartbeat,
            wake_queue_capacity,
        })
    }

    /// Effective values keyed by their environment variable.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let jobs = &self.jobs;
        let hb = &self.heartbeat;
        vec![
            ("JOBVISOR_YIELD_MS", jobs.default_yield.as_millis().to_string()),
            ("JOBVISOR_JOB_TIMEOUT_SECS", jobs.default_timeout.as_secs().to_string()),
            ("JOBVISOR_MAX_OUTPUT_BYTES", jobs.max_output_bytes.to_string()),
            ("JOBVISOR_TAIL_BYTES", jobs.tail_bytes.to_string()),
            ("JOBVISOR_SAMPLE_INTERVAL_MS", jobs.sample_interval.as_millis().to_string()),
            ("JOBVISOR_SWEEP_INTERVAL_SECS", jobs.sweep_interval.as_secs().to_string()),
            ("JOBVISOR_FINISHED_TTL_SECS", jobs.finished_ttl.as_secs().to_string()),
            ("JOBVISOR_SHELL", jobs.shell.clone()),
            ("JOBVISOR_HEARTBEAT_DEDUP_SECS", hb.dedup_window.as_secs().to_string()),
            ("JOBVISOR_HEARTBEAT_ACK_MAX_CHARS", hb.ack_max_chars.to_string()),
            ("JOBVISOR_HEARTBEAT_INTERVAL_SECS", hb.default_interval.as_secs().to_string()),
            ("JOBVISOR_WAKE_QUEUE", self.wake_queue_capacity.to_string()),
        ]
    }
}

fn secs(v: &str) -> Result<Duration, std::num::ParseIntError> {
    u64::from_str(v).map(Duration::from_secs)
}

fn parse_or<F, T, P, E>(lookup: &F, key: &str, default: T, parse: P) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, E>,
    E: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            parse(raw.trim()).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            })
        }
        _ => Ok(default),
    }
}
