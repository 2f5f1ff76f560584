//! Tool-call bindings.
//!
//! Agents reach the job engine through tools:
//! - `exec` submits a command
//! - `process` lists, polls, reads, writes to, kills and clears jobs

pub mod builtin;

mod tool;

pub use builtin::{ExecTool, ProcessTool};
pub use tool::{Tool, ToolContext, ToolError, ToolOutput};
