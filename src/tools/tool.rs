//! Tool trait and types.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::JobError;

/// Error type for tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),
}

impl From<JobError> for ToolError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::InvalidRequest { reason } => ToolError::InvalidParameters(reason),
            other => ToolError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Who is calling a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContext {
    /// Agent on whose behalf the tool runs.
    pub agent_id: String,
    /// Conversation the call came from, if any.
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: None,
            user_id: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.user_id = Some(user_id.into());
        self
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// The result data.
    pub result: serde_json::Value,
    /// Time taken.
    pub duration: Duration,
}

impl ToolOutput {
    /// Create a successful output with a JSON result.
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }
}

/// Trait for tools that an agent can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name.
    fn name(&self) -> &str;

    /// Get a description of what the tool does.
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given parameters.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Required string parameter.
pub(crate) fn require_str<'a>(
    params: &'a serde_json::Value,
    name: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", name)))
}

/// Optional non-negative integer parameter.
pub(crate) fn optional_u64(params: &serde_json::Value, name: &str) -> Result<Option<u64>, ToolError> {
    match params.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            ToolError::InvalidParameters(format!("'{}' must be a non-negative integer", name))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_helpers() {
        let params = serde_json::json!({"command": "ls", "timeout": 5, "bad": -1});
        assert_eq!(require_str(&params, "command").unwrap(), "ls");
        assert!(matches!(
            require_str(&params, "missing"),
            Err(ToolError::InvalidParameters(_))
        ));
        assert_eq!(optional_u64(&params, "timeout").unwrap(), Some(5));
        assert_eq!(optional_u64(&params, "absent").unwrap(), None);
        assert!(optional_u64(&params, "bad").is_err());
    }

    #[test]
    fn test_job_error_mapping() {
        let invalid: ToolError = JobError::InvalidRequest {
            reason: "command is required".to_string(),
        }
        .into();
        assert!(matches!(invalid, ToolError::InvalidParameters(_)));

        let other: ToolError = JobError::NotFound {
            id: "job_x".to_string(),
        }
        .into();
        assert!(matches!(other, ToolError::ExecutionFailed(_)));
    }
}
