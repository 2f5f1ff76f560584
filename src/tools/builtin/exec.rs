//! `exec` tool: run a shell command under job supervision.
//!
//! Short commands come back with their output inline. Anything still running
//! when the yield window closes is backgrounded and keeps running; the agent
//! follows up with the `process` tool and is woken when the job finishes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;

use crate::jobs::{JobEngine, JobSpec, WakeMode};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput, optional_u64, require_str};

/// Commands that are always blocked for safety.
static BLOCKED_COMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "rm -rf /",
        "rm -rf /*",
        ":(){ :|:& };:", // Fork bomb
        "dd if=/dev/zero",
        "mkfs",
        "chmod -R 777 /",
        "> /dev/sda",
        "curl | sh",
        "wget | sh",
        "curl | bash",
        "wget | bash",
    ])
});

/// Submit shell commands to the [`JobEngine`].
pub struct ExecTool {
    engine: JobEngine,
}

impl ExecTool {
    pub fn new(engine: JobEngine) -> Self {
        Self { engine }
    }

    /// Check if a command is blocked.
    fn is_blocked(cmd: &str) -> bool {
        let normalized = cmd.to_lowercase();
        BLOCKED_COMMANDS
            .iter()
            .any(|blocked| normalized.contains(&blocked.to_lowercase()))
    }

    fn spec_from(params: &serde_json::Value, ctx: &ToolContext) -> Result<JobSpec, ToolError> {
        let command = require_str(params, "command")?;
        if Self::is_blocked(command) {
            return Err(ToolError::NotAuthorized(format!(
                "Command contains blocked pattern: {}",
                truncate_for_error(command)
            )));
        }

        let mut spec = JobSpec::new(ctx.agent_id.clone(), command);
        spec.session_id = ctx.session_id.clone();
        spec.user_id = ctx.user_id.clone();
        spec.cwd = params
            .get("workdir")
            .and_then(|v| v.as_str())
            .map(PathBuf::from);
        spec.timeout_secs = optional_u64(params, "timeout")?;
        spec.yield_ms = optional_u64(params, "yield_ms")?;
        spec.background = params
            .get("background")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        spec.wake_context = params
            .get("wake_context")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        spec.wake_mode = match params.get("wake_mode").and_then(|v| v.as_str()) {
            None | Some("heartbeat") => WakeMode::Heartbeat,
            Some("conversation") => {
                if ctx.session_id.is_none() {
                    return Err(ToolError::InvalidParameters(
                        "wake_mode 'conversation' requires a conversation session".to_string(),
                    ));
                }
                WakeMode::Conversation
            }
            Some(other) => {
                return Err(ToolError::InvalidParameters(format!(
                    "unknown wake_mode '{}'",
                    other
                )));
            }
        };
        Ok(spec)
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Run a shell command. Returns its output if it finishes within the yield window; \
         otherwise it keeps running in the background and you are woken when it finishes. \
         Use the process tool to poll, read logs, write input or kill it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory for the command (optional)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (optional)"
                },
                "yield_ms": {
                    "type": "integer",
                    "description": "How long to wait for completion before backgrounding; 0 waits until done"
                },
                "background": {
                    "type": "boolean",
                    "description": "Return immediately and run in the background"
                },
                "wake_mode": {
                    "type": "string",
                    "enum": ["heartbeat", "conversation"],
                    "description": "How to be notified when the job finishes"
                },
                "wake_context": {
                    "type": "string",
                    "description": "Note to include with the completion notice"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let spec = Self::spec_from(&params, ctx)?;
        let result = self.engine.submit(spec).await?;

        let summary = &result.summary;
        let mut output = serde_json::json!({
            "job_id": summary.id,
            "status": summary.status,
            "backgrounded": result.backgrounded,
            "exit_code": summary.exit_code,
            "exit_signal": summary.exit_signal,
            "truncated": summary.truncated,
        });
        if result.backgrounded {
            output["tail"] = serde_json::Value::String(summary.tail.clone());
        } else {
            output["stdout"] = result.stdout.into();
            output["stderr"] = result.stderr.into();
            output["duration_ms"] = summary.duration_ms.into();
        }

        Ok(ToolOutput::success(output, start.elapsed()))
    }
}

fn truncate_for_error(s: &str) -> String {
    const MAX: usize = 100;
    if s.len() <= MAX {
        return s.to_string();
    }
    let end = crate::jobs::output::floor_boundary(s, MAX);
    format!("{}...", &s[..end])
}
