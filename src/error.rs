//! Error types for the supervision core.

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse agent directory: {0}")]
    AgentDirectory(#[from] serde_json::Error),
}

/// Job supervision errors.
///
/// Only malformed requests surface as errors to callers; "not found" and
/// "not running" are ordinary outcomes reported as `None`/`false`.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Failed to spawn command: {reason}")]
    SpawnFailed { reason: String },

    #[error("Job {id} not found")]
    NotFound { id: String },
}

/// Errors raised by the agent runtime collaborator.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent runtime failed: {reason}")]
    RuntimeFailed { reason: String },

    #[error("Agent output stream failed: {reason}")]
    StreamFailed { reason: String },
}

/// Delivery channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} not found")]
    NotFound { name: String },
}
