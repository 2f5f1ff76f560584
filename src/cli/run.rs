//! `jobvisor run`: submit one command and follow it to completion.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::config::Config;
use crate::jobs::{JobEngine, JobSpec};

/// How often a backgrounded job is polled for new output.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Agent that owns the job
    #[arg(short, long, default_value = "cli")]
    pub agent: String,

    /// Working directory (defaults to the current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Milliseconds to wait before backgrounding; 0 waits until done
    #[arg(long)]
    pub yield_ms: Option<u64>,

    /// Return immediately and follow the job in the background
    #[arg(short, long)]
    pub background: bool,

    /// Command to run
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    fn spec(&self) -> JobSpec {
        JobSpec {
            agent_id: self.agent.clone(),
            command: self.command.join(" "),
            cwd: self.cwd.clone(),
            timeout_secs: self.timeout,
            yield_ms: self.yield_ms,
            background: self.background,
            ..Default::default()
        }
    }
}

/// Run the command. Returns the process exit code to report.
pub async fn run_command(args: RunArgs) -> anyhow::Result<i32> {
    let config = Config::from_env()?;
    let engine = JobEngine::new(config.jobs);

    tokio::select! {
        code = follow(&engine, args.spec()) => code,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, killing running jobs");
            engine.shutdown();
            Ok(130)
        }
    }
}

async fn follow(engine: &JobEngine, spec: JobSpec) -> anyhow::Result<i32> {
    let result = engine.submit(spec).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.backgrounded {
        return Ok(result.summary.exit_code.unwrap_or(1));
    }

    let id = result.summary.id;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(poll) = engine.poll(&id) else {
            anyhow::bail!("Job {} disappeared", id);
        };
        if !poll.delta.is_empty() {
            print!("{}", poll.delta);
        }
        if poll.done {
            break;
        }
    }

    let summary = engine
        .get(&id)
        .ok_or_else(|| anyhow::anyhow!("Job {} disappeared", id))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary.exit_code.unwrap_or(1))
}
