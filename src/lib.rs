//! Job supervision and heartbeat wake core for long-running agents.
//!
//! - [`jobs::JobEngine`] spawns shell commands, races them against a yield
//!   window, buffers their output, enforces timeouts and sweeps old jobs.
//! - [`heartbeat::HeartbeatGuard`] runs guarded per-agent wake ticks with
//!   ack-token suppression and duplicate detection.
//! - [`wake::WakeBridge`] carries job completions to the owning agent.

pub mod agent;
pub mod channels;
pub mod cli;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod jobs;
pub mod tools;
pub mod wake;

pub use config::Config;
