//! Best-effort CPU/memory sampling for running jobs.
//!
//! Sampling shells out to `ps`. Any failure (missing binary, process already
//! reaped, unparsable output) just yields no sample; the previous stats stay
//! in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::registry::JobRegistry;

/// Last sampled resource usage of a job's process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    /// CPU usage in percent of one core.
    pub cpu: f64,
    /// Resident set size in bytes.
    pub memory: u64,
    pub sampled_at: DateTime<Utc>,
}

/// Parse `ps -o %cpu=,rss=` output. RSS is reported in KiB.
pub fn parse_ps_output(output: &str) -> Option<(f64, u64)> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.split_whitespace();
    let cpu = fields.next()?.parse::<f64>().ok()?;
    let rss_kib = fields.next()?.parse::<u64>().ok()?;
    Some((cpu, rss_kib.saturating_mul(1024)))
}

/// Take one sample of `pid`. Returns `None` if the process is gone or `ps`
/// is unavailable.
pub async fn sample(pid: u32) -> Option<ResourceStats> {
    let output = Command::new("ps")
        .args(["-o", "%cpu=,rss=", "-p", &pid.to_string()])
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let (cpu, memory) = parse_ps_output(&String::from_utf8_lossy(&output.stdout))?;
    Some(ResourceStats {
        cpu,
        memory,
        sampled_at: Utc::now(),
    })
}

/// Sample `pid` every `interval` until the job leaves the running map.
pub(crate) fn spawn_sampler(
    registry: Arc<JobRegistry>,
    job_id: String,
    pid: u32,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(stats) = sample(pid).await else {
                tracing::debug!(job_id = %job_id, pid, "Resource sample unavailable");
                if !registry.is_running(&job_id) {
                    break;
                }
                continue;
            };
            if !registry.record_resources(&job_id, stats) {
                break;
            }
        }
    })
}
