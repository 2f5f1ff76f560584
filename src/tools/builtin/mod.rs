//! Built-in tools that come with the supervisor.

mod exec;
mod process;

pub use exec::ExecTool;
pub use process::ProcessTool;
