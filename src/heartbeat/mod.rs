//! Heartbeat ticks: periodic and job-triggered wake cycles for agents.
//!
//! Each tick passes an ordered guard chain (already running, unknown agent,
//! disabled, quiet hours, empty instructions) before the agent runtime is
//! called. The reply is then checked for the [`HEARTBEAT_OK`] ack token and
//! for duplicates of the last delivered text before it is delivered.

mod ack;
pub mod active_hours;
pub mod checklist;
mod guard;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ack::{StrippedReply, is_silent_ack, strip_ack_token};
pub use active_hours::{ActiveHours, Timezone};
pub use guard::HeartbeatGuard;

/// Reply meaning "nothing needs attention".
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Outcome of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeartbeatStatus {
    /// The agent acknowledged with nothing to report.
    OkToken,
    Sent,
    Skipped,
    Failed,
}

impl std::fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeartbeatStatus::OkToken => write!(f, "ok-token"),
            HeartbeatStatus::Sent => write!(f, "sent"),
            HeartbeatStatus::Skipped => write!(f, "skipped"),
            HeartbeatStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a tick was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    AlreadyRunning,
    UnknownAgent,
    AgentDisabled,
    QuietHours,
    EmptyInstructions,
    Duplicate,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::AlreadyRunning => "already-running",
            SkipReason::UnknownAgent => "unknown-agent",
            SkipReason::AgentDisabled => "agent-disabled",
            SkipReason::QuietHours => "quiet-hours",
            SkipReason::EmptyInstructions => "empty-instructions",
            SkipReason::Duplicate => "duplicate",
        };
        write!(f, "{}", s)
    }
}

/// Emitted on the `heartbeat:status` event stream after every tick, and
/// returned by [`HeartbeatGuard::tick`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatEvent {
    pub agent_id: String,
    pub status: HeartbeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    /// Delivered (or suppressed duplicate) text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

impl HeartbeatEvent {
    pub const NAME: &'static str = "heartbeat:status";
}

/// Point-in-time view of one agent's heartbeat state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatSnapshot {
    pub agent_id: String,
    pub running: bool,
    pub last_status: Option<HeartbeatStatus>,
    pub last_skip_reason: Option<SkipReason>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&HeartbeatStatus::OkToken).unwrap(),
            "\"ok-token\""
        );
        assert_eq!(
            serde_json::to_string(&SkipReason::EmptyInstructions).unwrap(),
            "\"empty-instructions\""
        );
        assert_eq!(SkipReason::QuietHours.to_string(), "quiet-hours");
        assert_eq!(HeartbeatStatus::OkToken.to_string(), "ok-token");
    }
}
