//! Job supervision: spawning, buffering, timing out, polling and sweeping
//! shell commands run on behalf of agents.
//!
//! The [`JobEngine`] is the public surface. Sessions live in a two-map
//! [`registry`] (running and finished) and move between the maps exactly once,
//! when the job is finalized.

mod engine;
pub mod output;
pub mod process;
mod registry;
pub mod sampler;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use engine::{JobEngine, SPAWN_FAILURE_EXIT_CODE};
pub use output::OutputStream;
pub use sampler::ResourceStats;

/// Lifecycle state of a job session.
///
/// Transitions only go forward, from `Running` to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    /// Status for a natural exit with the given code.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => JobStatus::Completed,
            _ => JobStatus::Failed,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Timeout => write!(f, "timeout"),
            JobStatus::Killed => write!(f, "killed"),
        }
    }
}

/// How a finished job notifies its owning agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeMode {
    /// A heartbeat tick only.
    #[default]
    Heartbeat,
    /// A heartbeat tick plus a turn injected into the originating conversation.
    Conversation,
}

/// A request to run a command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    pub agent_id: String,
    pub command: String,
    /// Working directory; the host's current directory when unset.
    pub cwd: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub wake_mode: WakeMode,
    pub wake_context: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// How long to wait for completion before backgrounding. `Some(0)` waits
    /// for completion; `None` uses the configured grace period.
    pub yield_ms: Option<u64>,
    /// Return immediately without waiting at all.
    pub background: bool,
}

impl JobSpec {
    pub fn new(agent_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_yield_ms(mut self, ms: u64) -> Self {
        self.yield_ms = Some(ms);
        self
    }

    pub fn in_background(mut self) -> Self {
        self.background = true;
        self
    }

    /// Wake the given conversation when the job finishes.
    pub fn waking_conversation(
        mut self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        context: Option<String>,
    ) -> Self {
        self.wake_mode = WakeMode::Conversation;
        self.session_id = Some(session_id.into());
        self.user_id = Some(user_id.into());
        self.wake_context = context;
        self
    }
}

/// Read-only copy of a job session's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub agent_id: String,
    pub command: String,
    pub cwd: PathBuf,
    pub pid: Option<u32>,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub timeout_ms: u64,
    pub tail: String,
    pub truncated: bool,
    pub total_output_chars: u64,
    pub wake_mode: WakeMode,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub resource_stats: Option<ResourceStats>,
}

/// Result of a submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub summary: JobSummary,
    /// True when the call returned while the job was still running.
    pub backgrounded: bool,
    /// Full captured stdout, present only when the job finished in time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Output produced since the previous poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub delta: String,
    pub status: JobStatus,
    pub done: bool,
}

/// A page of a job's combined output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogPage {
    pub log: String,
    pub total: usize,
}

/// Emitted on the `job:status` event stream when a job starts and when it
/// reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: String,
    pub agent_id: String,
    pub command: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub tail: String,
    pub truncated: bool,
}

impl JobEvent {
    pub const NAME: &'static str = "job:status";

    pub(crate) fn from_summary(summary: &JobSummary) -> Self {
        Self {
            job_id: summary.id.clone(),
            agent_id: summary.agent_id.clone(),
            command: summary.command.clone(),
            status: summary.status,
            exit_code: summary.exit_code,
            exit_signal: summary.exit_signal.clone(),
            started_at: summary.started_at,
            duration_ms: summary.duration_ms,
            tail: summary.tail.clone(),
            truncated: summary.truncated,
        }
    }
}

/// Generate an opaque job id.
pub(crate) fn generate_job_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("job_{}", &uuid[..12])
}
