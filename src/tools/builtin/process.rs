//! `process` tool: inspect and control jobs started with `exec`.
//!
//! Agents only see their own jobs; a job id belonging to another agent is
//! reported as not found.

use std::time::Instant;

use async_trait::async_trait;

use crate::error::JobError;
use crate::jobs::{JobEngine, JobSummary};
use crate::tools::tool::{Tool, ToolContext, ToolError, ToolOutput, optional_u64, require_str};

pub struct ProcessTool {
    engine: JobEngine,
}

impl ProcessTool {
    pub fn new(engine: JobEngine) -> Self {
        Self { engine }
    }

    /// The job, if it exists and belongs to the calling agent.
    fn owned(&self, id: &str, ctx: &ToolContext) -> Result<JobSummary, ToolError> {
        self.engine
            .get(id)
            .filter(|job| job.agent_id == ctx.agent_id)
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &str) -> ToolError {
    JobError::NotFound { id: id.to_string() }.into()
}

/// Optional byte count that must fit in `usize`.
fn optional_usize(params: &serde_json::Value, name: &str) -> Result<Option<usize>, ToolError> {
    optional_u64(params, name)?
        .map(|v| {
            usize::try_from(v).map_err(|_| {
                ToolError::InvalidParameters(format!("'{}' is too large", name))
            })
        })
        .transpose()
}

#[async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manage background jobs started with exec. Actions: list, get, poll (new output \
         since the last poll), log (paged output), write (send input), kill, clear \
         (forget a finished job)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "get", "poll", "log", "write", "kill", "clear"]
                },
                "job_id": {
                    "type": "string",
                    "description": "Job id (all actions except list)"
                },
                "offset": {
                    "type": "integer",
                    "description": "Byte offset for log"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum bytes for log"
                },
                "data": {
                    "type": "string",
                    "description": "Input to write to the job's stdin"
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let action = require_str(&params, "action")?;

        let result = match action {
            "list" => {
                let jobs: Vec<serde_json::Value> = self
                    .engine
                    .list(Some(&ctx.agent_id))
                    .into_iter()
                    .map(|job| {
                        serde_json::json!({
                            "job_id": job.id,
                            "command": job.command,
                            "status": job.status,
                            "started_at": job.started_at,
                            "duration_ms": job.duration_ms,
                        })
                    })
                    .collect();
                serde_json::json!({ "jobs": jobs })
            }
            "get" => {
                let id = require_str(&params, "job_id")?;
                serde_json::to_value(self.owned(id, ctx)?)
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
            }
            "poll" => {
                let id = require_str(&params, "job_id")?;
                self.owned(id, ctx)?;
                let poll = self
                    .engine
                    .poll(id)
                    .ok_or_else(|| not_found(id))?;
                serde_json::json!({
                    "delta": poll.delta,
                    "status": poll.status,
                    "done": poll.done,
                })
            }
            "log" => {
                let id = require_str(&params, "job_id")?;
                self.owned(id, ctx)?;
                let offset = optional_usize(&params, "offset")?;
                let limit = optional_usize(&params, "limit")?;
                let page = self
                    .engine
                    .log(id, offset, limit)
                    .ok_or_else(|| not_found(id))?;
                serde_json::json!({ "log": page.log, "total": page.total })
            }
            "write" => {
                let id = require_str(&params, "job_id")?;
                let data = require_str(&params, "data")?;
                self.owned(id, ctx)?;
                let written = self.engine.write(id, data.as_bytes());
                serde_json::json!({ "written": written })
            }
            "kill" => {
                let id = require_str(&params, "job_id")?;
                self.owned(id, ctx)?;
                serde_json::json!({ "killed": self.engine.kill(id) })
            }
            "clear" => {
                let id = require_str(&params, "job_id")?;
                self.owned(id, ctx)?;
                serde_json::json!({ "cleared": self.engine.clear(id) })
            }
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "unknown action '{}'",
                    other
                )));
            }
        };

        Ok(ToolOutput::success(result, start.elapsed()))
    }
}
