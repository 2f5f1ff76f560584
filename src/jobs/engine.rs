//! Job supervision engine.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use super::output::{JobOutput, OutputStream, Utf8Decoder};
use super::process::{self, ExitOutcome};
use super::registry::{JobRegistry, JobSession, StdinQueue};
use super::sampler::spawn_sampler;
use super::{
    JobEvent, JobSpec, JobStatus, JobSummary, LogPage, PollResult, SubmitResult, generate_job_id,
};
use crate::config::JobsConfig;
use crate::error::JobError;
use crate::wake::WakeBridge;

/// Exit code recorded when a command could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Capacity of the job event channel.
const EVENT_CAPACITY: usize = 256;

/// Read buffer size for stdout/stderr pumps.
const READ_CHUNK: usize = 8192;

/// How long a finished process's output pipes may stay open (held by a
/// lingering grandchild) before the job is finalized anyway.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Pending stdin writes per job before `write` starts refusing input.
const STDIN_QUEUE: usize = 64;

struct EngineInner {
    config: JobsConfig,
    registry: Arc<JobRegistry>,
    events: broadcast::Sender<JobEvent>,
    wake: Option<WakeBridge>,
    sweeper: Option<AbortHandle>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

/// Spawns, supervises and tracks shell commands for agents.
///
/// Cloning is cheap; all clones share the same registry.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl JobEngine {
    /// Engine without a wake bridge; finished jobs wake nobody.
    ///
    /// Inside a Tokio runtime this also starts the sweeper, which runs until
    /// the last clone of the engine is dropped. Outside one, finished jobs
    /// are only evicted by [`sweep`](Self::sweep).
    pub fn new(config: JobsConfig) -> Self {
        Self::build(config, None)
    }

    /// Engine that wakes owning agents through `wake` when jobs finish.
    pub fn with_wake(config: JobsConfig, wake: WakeBridge) -> Self {
        Self::build(config, Some(wake))
    }

    fn build(config: JobsConfig, wake: Option<WakeBridge>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = Arc::new(JobRegistry::new());
        let sweeper = spawn_sweeper(Arc::clone(&registry), &config);
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                events,
                wake,
                sweeper,
            }),
        }
    }

    pub fn config(&self) -> &JobsConfig {
        &self.inner.config
    }

    /// Start a command and run the yield race.
    ///
    /// Returns with the captured output if the command finishes within the
    /// yield window, otherwise with `backgrounded = true` while supervision
    /// continues. Only a malformed request is an error; a command that
    /// cannot be spawned comes back as a `failed` job.
    pub async fn submit(&self, spec: JobSpec) -> Result<SubmitResult, JobError> {
        if spec.command.trim().is_empty() {
            return Err(JobError::InvalidRequest {
                reason: "command is required".to_string(),
            });
        }
        if spec.agent_id.trim().is_empty() {
            return Err(JobError::InvalidRequest {
                reason: "agent_id is required".to_string(),
            });
        }

        let config = &self.inner.config;
        let id = generate_job_id();
        let cwd = match &spec.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };
        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(config.default_timeout);
        let (status_tx, mut status_rx) = watch::channel(JobStatus::Running);
        let session = JobSession::new(
            id.clone(),
            &spec,
            cwd.clone(),
            timeout,
            JobOutput::new(config.max_output_bytes, config.tail_bytes),
            status_tx,
        );

        let spawned = match process::spawn(&config.shell, &spec.command, &cwd) {
            Ok(spawned) => spawned,
            Err(e) => {
                let error = JobError::SpawnFailed {
                    reason: e.to_string(),
                };
                tracing::warn!(
                    job_id = %id,
                    agent_id = %spec.agent_id,
                    command = %spec.command,
                    "{}",
                    error
                );
                self.inner.registry.insert_running(session);
                self.inner
                    .registry
                    .append_output(&id, OutputStream::Stderr, &error.to_string());
                self.finalize(
                    &id,
                    ExitOutcome::code(SPAWN_FAILURE_EXIT_CODE),
                    Some(JobStatus::Failed),
                    true,
                );
                return Ok(self.completed_result(&id));
            }
        };

        let process::SpawnedProcess {
            handle,
            stdin,
            stdout,
            stderr,
            exit,
        } = spawned;
        let pid = handle.pid();
        let mut tasks: Vec<AbortHandle> = Vec::new();
        let stdin = stdin.map(|pipe| {
            let (queue, writer) = self.spawn_writer(&id, pipe);
            tasks.push(writer.abort_handle());
            queue
        });
        let session = session.with_process(handle, stdin);
        // Emitted before the session is visible, so nothing can finalize it
        // ahead of its start event.
        self.emit(&session.summary());
        self.inner.registry.insert_running(session);

        tracing::info!(
            job_id = %id,
            agent_id = %spec.agent_id,
            pid = ?pid,
            timeout_ms = timeout.as_millis() as u64,
            "Job started: {}",
            spec.command
        );

        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = stdout {
            readers.push(self.spawn_reader(&id, OutputStream::Stdout, stdout));
        }
        if let Some(stderr) = stderr {
            readers.push(self.spawn_reader(&id, OutputStream::Stderr, stderr));
        }
        tasks.extend(readers.iter().map(JoinHandle::abort_handle));

        let engine = self.clone();
        let timeout_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            engine.expire(&timeout_id);
        });
        tasks.push(timer.abort_handle());

        if let Some(pid) = pid {
            let sampler = spawn_sampler(
                Arc::clone(&self.inner.registry),
                id.clone(),
                pid,
                config.sample_interval,
            );
            tasks.push(sampler.abort_handle());
        }

        self.inner.registry.attach_tasks(&id, tasks);
        self.spawn_monitor(&id, exit, readers);

        if spec.background {
            return Ok(self.running_result(&id));
        }

        let yield_for = spec
            .yield_ms
            .map(Duration::from_millis)
            .unwrap_or(config.default_yield);

        if yield_for.is_zero() {
            let _ = status_rx.wait_for(JobStatus::is_terminal).await;
        } else {
            tokio::select! {
                _ = status_rx.wait_for(JobStatus::is_terminal) => {}
                _ = tokio::time::sleep(yield_for) => {}
            }
        }

        // Whichever leg resolved, the registry decides: a job that finished
        // just as the yield timer fired is reported as finished.
        match self.inner.registry.summary(&id) {
            Some(summary) if summary.status.is_terminal() => Ok(self.completed_result(&id)),
            _ => Ok(self.running_result(&id)),
        }
    }

    fn completed_result(&self, id: &str) -> SubmitResult {
        match self.inner.registry.captured(id) {
            Some(captured) => SubmitResult {
                summary: captured.summary,
                backgrounded: false,
                stdout: Some(captured.stdout),
                stderr: Some(captured.stderr),
            },
            // Only reachable if the job was cleared in between.
            None => self.running_result(id),
        }
    }

    fn running_result(&self, id: &str) -> SubmitResult {
        let summary = self.inner.registry.summary(id);
        let backgrounded = summary
            .as_ref()
            .is_none_or(|s| s.status == JobStatus::Running);
        SubmitResult {
            summary: summary.unwrap_or_else(|| placeholder_summary(id)),
            backgrounded,
            stdout: None,
            stderr: None,
        }
    }

    fn spawn_reader<R>(&self, id: &str, stream: OutputStream, mut reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let registry = Arc::clone(&self.inner.registry);
        let id = id.to_string();
        tokio::spawn(async move {
            let mut decoder = Utf8Decoder::default();
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let text = decoder.decode(&buf[..n]);
                        if !registry.append_output(&id, stream, &text) {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(job_id = %id, ?stream, "Output read failed: {}", e);
                        break;
                    }
                }
            }
            let rest = decoder.finish();
            registry.append_output(&id, stream, &rest);
        })
    }

    /// Feed queued input to the child's stdin until the queue closes or a
    /// write fails.
    fn spawn_writer(&self, id: &str, mut pipe: ChildStdin) -> (StdinQueue, JoinHandle<()>) {
        let (queue, mut pending) = mpsc::channel::<Vec<u8>>(STDIN_QUEUE);
        let id = id.to_string();
        let writer = tokio::spawn(async move {
            while let Some(chunk) = pending.recv().await {
                let written = async {
                    pipe.write_all(&chunk).await?;
                    pipe.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::debug!(job_id = %id, "stdin write failed, closing: {}", e);
                    break;
                }
            }
        });
        (queue, writer)
    }

    /// Wait for the process to exit, let the readers drain, then finalize.
    fn spawn_monitor(
        &self,
        id: &str,
        exit: tokio::sync::oneshot::Receiver<ExitOutcome>,
        readers: Vec<JoinHandle<()>>,
    ) {
        let engine = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let outcome = exit.await.unwrap_or_default();
            let drain = futures::future::join_all(readers);
            if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                tracing::debug!(job_id = %id, "Output pipes still open after exit, finalizing");
            }
            engine.finalize(&id, outcome, None, true);
        });
    }

    /// Timeout timer fired.
    fn expire(&self, id: &str) {
        if !self.inner.registry.signal_kill(id) {
            return;
        }
        tracing::warn!(job_id = %id, "Job timed out, killing");
        self.finalize(
            id,
            ExitOutcome::signalled("SIGKILL"),
            Some(JobStatus::Timeout),
            true,
        );
    }

    /// The single terminal transition. Returns false if the job was not
    /// running (already finalized or unknown).
    fn finalize(
        &self,
        id: &str,
        exit: ExitOutcome,
        status_override: Option<JobStatus>,
        wake: bool,
    ) -> bool {
        let Some(finished) = self.inner.registry.finalize(id, exit, status_override) else {
            return false;
        };
        let summary = &finished.summary;

        tracing::info!(
            job_id = %summary.id,
            agent_id = %summary.agent_id,
            status = %summary.status,
            exit_code = ?summary.exit_code,
            exit_signal = ?summary.exit_signal,
            duration_ms = ?summary.duration_ms,
            "Job finished"
        );

        self.emit(summary);

        if wake {
            if let Some(bridge) = &self.inner.wake {
                bridge.job_finished(summary, finished.wake_context.clone());
            }
        }
        true
    }

    fn emit(&self, summary: &JobSummary) {
        // No subscribers is fine.
        let _ = self.inner.events.send(JobEvent::from_summary(summary));
    }

    /// Summary of a running or finished job.
    pub fn get(&self, id: &str) -> Option<JobSummary> {
        self.inner.registry.summary(id)
    }

    /// All known jobs, optionally only those of one agent, oldest first.
    pub fn list(&self, agent_id: Option<&str>) -> Vec<JobSummary> {
        self.inner.registry.list(agent_id)
    }

    /// Kill a running job. Returns false if it is not running.
    pub fn kill(&self, id: &str) -> bool {
        if !self.inner.registry.signal_kill(id) {
            return false;
        }
        self.finalize(
            id,
            ExitOutcome::signalled("SIGKILL"),
            Some(JobStatus::Killed),
            true,
        )
    }

    /// Forget a finished job. Running jobs must be killed first.
    pub fn clear(&self, id: &str) -> bool {
        self.inner.registry.clear_finished(id)
    }

    /// Output written since the previous poll of this job.
    pub fn poll(&self, id: &str) -> Option<PollResult> {
        self.inner.registry.poll(id)
    }

    /// A page of the combined output, independent of the poll cursor.
    pub fn log(&self, id: &str, offset: Option<usize>, limit: Option<usize>) -> Option<LogPage> {
        self.inner.registry.log(id, offset.unwrap_or(0), limit)
    }

    /// Queue raw bytes for a running job's stdin.
    ///
    /// Never waits on the pipe. Returns false if the job is not running or
    /// its input queue is full or closed.
    pub fn write(&self, id: &str, data: &[u8]) -> bool {
        self.inner.registry.send_stdin(id, data.to_vec())
    }

    /// Wait until a job reaches a terminal state and return its summary.
    pub async fn wait(&self, id: &str) -> Option<JobSummary> {
        let mut rx = self.inner.registry.status_receiver(id)?;
        let _ = rx.wait_for(JobStatus::is_terminal).await;
        self.get(id)
    }

    /// Evict finished jobs older than the configured TTL.
    pub fn sweep(&self) -> usize {
        sweep_finished(&self.inner.registry, self.inner.config.finished_ttl)
    }

    /// Kill every running job and finalize it as failed, without waking
    /// anyone. Returns the number of jobs killed.
    pub fn shutdown(&self) -> usize {
        let ids = self.inner.registry.running_ids();
        let mut killed = 0;
        for id in ids {
            if self.inner.registry.signal_kill(&id)
                && self.finalize(
                    &id,
                    ExitOutcome::signalled("SIGKILL"),
                    Some(JobStatus::Failed),
                    false,
                )
            {
                killed += 1;
            }
        }
        if killed > 0 {
            tracing::info!(count = killed, "Killed running jobs on shutdown");
        }
        killed
    }

    /// Receive `job:status` events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// `job:status` events as a stream. Lagged events are skipped.
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = JobEvent> + Send>> {
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok());
        Box::pin(stream)
    }
}

fn sweep_finished(registry: &JobRegistry, ttl: Duration) -> usize {
    let removed = registry.sweep(ttl);
    if !removed.is_empty() {
        tracing::debug!(count = removed.len(), "Swept finished jobs");
    }
    removed.len()
}

/// Sweep on the configured cadence. Holds only the registry and is aborted
/// when the engine drops; `None` without a runtime.
fn spawn_sweeper(registry: Arc<JobRegistry>, config: &JobsConfig) -> Option<AbortHandle> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let every = config.sweep_interval.max(Duration::from_millis(1));
    let ttl = config.finished_ttl;
    let sweeper = runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // Skip the immediate first tick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_finished(&registry, ttl);
        }
    });
    Some(sweeper.abort_handle())
}

fn placeholder_summary(id: &str) -> JobSummary {
    JobSummary {
        id: id.to_string(),
        agent_id: String::new(),
        command: String::new(),
        cwd: PathBuf::new(),
        pid: None,
        status: JobStatus::Failed,
        exit_code: None,
        exit_signal: None,
        started_at: chrono::Utc::now(),
        ended_at: None,
        duration_ms: None,
        timeout_ms: 0,
        tail: String::new(),
        truncated: false,
        total_output_chars: 0,
        wake_mode: Default::default(),
        session_id: None,
        user_id: None,
        resource_stats: None,
    }
}
