//! Running/finished job maps.
//!
//! Both maps sit behind one lock so that moving a session from running to
//! finished is atomic: an observer always finds an id in exactly one map.
//! The lock is never held across an await point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

use super::output::{JobOutput, OutputStream};
use super::process::{ExitOutcome, ProcessHandle};
use super::sampler::ResourceStats;
use super::{JobSpec, JobStatus, JobSummary, LogPage, PollResult, WakeMode};

/// Queue feeding a job's stdin writer task. Dropping it closes stdin.
pub(crate) type StdinQueue = mpsc::Sender<Vec<u8>>;

/// One supervised process execution and its captured state.
pub(crate) struct JobSession {
    id: String,
    agent_id: String,
    command: String,
    cwd: PathBuf,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    started: Instant,
    ended_at: Option<DateTime<Utc>>,
    ended: Option<Instant>,
    duration_ms: Option<u64>,
    status: JobStatus,
    exit_code: Option<i32>,
    exit_signal: Option<String>,
    timeout_ms: u64,
    wake_mode: WakeMode,
    wake_context: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    resource_stats: Option<ResourceStats>,
    output: JobOutput,
    poll_offset: usize,
    process: Option<ProcessHandle>,
    stdin: Option<StdinQueue>,
    /// Timeout timer, resource sampler, stdin writer and stream readers.
    tasks: Vec<AbortHandle>,
    status_tx: watch::Sender<JobStatus>,
}

impl JobSession {
    pub(crate) fn new(
        id: String,
        spec: &JobSpec,
        cwd: PathBuf,
        timeout: Duration,
        output: JobOutput,
        status_tx: watch::Sender<JobStatus>,
    ) -> Self {
        Self {
            id,
            agent_id: spec.agent_id.clone(),
            command: spec.command.clone(),
            cwd,
            pid: None,
            started_at: Utc::now(),
            started: Instant::now(),
            ended_at: None,
            ended: None,
            duration_ms: None,
            status: JobStatus::Running,
            exit_code: None,
            exit_signal: None,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            wake_mode: spec.wake_mode,
            wake_context: spec.wake_context.clone(),
            session_id: spec.session_id.clone(),
            user_id: spec.user_id.clone(),
            resource_stats: None,
            output,
            poll_offset: 0,
            process: None,
            stdin: None,
            tasks: Vec::new(),
            status_tx,
        }
    }

    pub(crate) fn with_process(mut self, process: ProcessHandle, stdin: Option<StdinQueue>) -> Self {
        self.pid = process.pid();
        self.process = Some(process);
        self.stdin = stdin;
        self
    }

    pub(crate) fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            status: self.status,
            exit_code: self.exit_code,
            exit_signal: self.exit_signal.clone(),
            started_at: self.started_at,
            ended_at: self.ended_at,
            duration_ms: self.duration_ms,
            timeout_ms: self.timeout_ms,
            tail: self.output.tail().to_string(),
            truncated: self.output.is_truncated(),
            total_output_chars: self.output.total_output_chars(),
            wake_mode: self.wake_mode,
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            resource_stats: self.resource_stats.clone(),
        }
    }
}

/// A session that has just reached a terminal state.
#[derive(Debug, Clone)]
pub(crate) struct FinalizedJob {
    pub summary: JobSummary,
    pub wake_context: Option<String>,
}

/// Captured output of a finished job.
#[derive(Debug, Clone)]
pub(crate) struct Captured {
    pub summary: JobSummary,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Default)]
struct RegistryMaps {
    running: HashMap<String, JobSession>,
    finished: HashMap<String, JobSession>,
}

impl RegistryMaps {
    fn get(&self, id: &str) -> Option<&JobSession> {
        self.running.get(id).or_else(|| self.finished.get(id))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut JobSession> {
        match self.running.get_mut(id) {
            Some(session) => Some(session),
            None => self.finished.get_mut(id),
        }
    }
}

/// Owner of every job session.
#[derive(Default)]
pub(crate) struct JobRegistry {
    maps: Mutex<RegistryMaps>,
}

impl JobRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_running(&self, session: JobSession) {
        let mut maps = self.maps.lock();
        maps.running.insert(session.id.clone(), session);
    }

    /// Attach timer/reader tasks to a running session. If the session has
    /// already been finalized the tasks are aborted straight away.
    pub(crate) fn attach_tasks(&self, id: &str, tasks: Vec<AbortHandle>) {
        let mut maps = self.maps.lock();
        match maps.running.get_mut(id) {
            Some(session) => session.tasks.extend(tasks),
            None => tasks.iter().for_each(AbortHandle::abort),
        }
    }

    /// Append decoded output to a running session.
    pub(crate) fn append_output(&self, id: &str, stream: OutputStream, chunk: &str) -> bool {
        let mut maps = self.maps.lock();
        match maps.running.get_mut(id) {
            Some(session) => {
                session.output.append(stream, chunk);
                true
            }
            None => false,
        }
    }

    /// Store a resource sample. Returns false once the job is no longer
    /// running, which stops the sampler.
    pub(crate) fn record_resources(&self, id: &str, stats: ResourceStats) -> bool {
        let mut maps = self.maps.lock();
        match maps.running.get_mut(id) {
            Some(session) => {
                session.resource_stats = Some(stats);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self, id: &str) -> bool {
        self.maps.lock().running.contains_key(id)
    }

    /// Send the kill signal to a running job's process group.
    ///
    /// Returns false if the job is not in the running map.
    pub(crate) fn signal_kill(&self, id: &str) -> bool {
        let mut maps = self.maps.lock();
        let Some(session) = maps.running.get_mut(id) else {
            return false;
        };
        if let Some(process) = session.process.as_mut() {
            process.kill();
        }
        true
    }

    /// Move a session from running to finished.
    ///
    /// This is the only terminal transition. A session that is no longer
    /// running is left untouched and `None` is returned, so racing callers
    /// (exit, timeout, kill) finalize at most once.
    pub(crate) fn finalize(
        &self,
        id: &str,
        exit: ExitOutcome,
        status_override: Option<JobStatus>,
    ) -> Option<FinalizedJob> {
        let mut maps = self.maps.lock();
        let mut session = maps.running.remove(id)?;

        for task in session.tasks.drain(..) {
            task.abort();
        }
        session.process = None;
        session.stdin = None;

        session.status = status_override.unwrap_or_else(|| JobStatus::from_exit_code(exit.code));
        session.exit_code = exit.code;
        session.exit_signal = exit.signal;
        session.ended_at = Some(Utc::now());
        session.ended = Some(Instant::now());
        session.duration_ms = Some(
            u64::try_from(session.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        session.status_tx.send_replace(session.status);

        let finalized = FinalizedJob {
            summary: session.summary(),
            wake_context: session.wake_context.clone(),
        };
        maps.finished.insert(session.id.clone(), session);
        Some(finalized)
    }

    pub(crate) fn summary(&self, id: &str) -> Option<JobSummary> {
        self.maps.lock().get(id).map(JobSession::summary)
    }

    /// Summary plus full captured streams.
    pub(crate) fn captured(&self, id: &str) -> Option<Captured> {
        let maps = self.maps.lock();
        let session = maps.get(id)?;
        Some(Captured {
            summary: session.summary(),
            stdout: session.output.stdout().to_string(),
            stderr: session.output.stderr().to_string(),
        })
    }

    /// All sessions, optionally filtered by agent, oldest first.
    pub(crate) fn list(&self, agent_id: Option<&str>) -> Vec<JobSummary> {
        let maps = self.maps.lock();
        let mut summaries: Vec<JobSummary> = maps
            .running
            .values()
            .chain(maps.finished.values())
            .filter(|s| agent_id.is_none_or(|agent| s.agent_id == agent))
            .map(JobSession::summary)
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub(crate) fn running_ids(&self) -> Vec<String> {
        self.maps.lock().running.keys().cloned().collect()
    }

    pub(crate) fn poll(&self, id: &str) -> Option<PollResult> {
        let mut maps = self.maps.lock();
        let session = maps.get_mut(id)?;
        let (delta, cursor) = session.output.delta_since(session.poll_offset);
        session.poll_offset = cursor;
        Some(PollResult {
            delta,
            status: session.status,
            done: session.status.is_terminal(),
        })
    }

    pub(crate) fn log(&self, id: &str, offset: usize, limit: Option<usize>) -> Option<LogPage> {
        let maps = self.maps.lock();
        let session = maps.get(id)?;
        let (log, total) = session.output.page(offset, limit);
        Some(LogPage { log, total })
    }

    /// Queue input for a running job's stdin without waiting.
    ///
    /// Returns false if the job is not running, has no stdin, or its queue
    /// is full or closed.
    pub(crate) fn send_stdin(&self, id: &str, data: Vec<u8>) -> bool {
        let maps = self.maps.lock();
        let Some(queue) = maps.running.get(id).and_then(|s| s.stdin.as_ref()) else {
            return false;
        };
        queue.try_send(data).is_ok()
    }

    pub(crate) fn status_receiver(&self, id: &str) -> Option<watch::Receiver<JobStatus>> {
        self.maps.lock().get(id).map(|s| s.status_tx.subscribe())
    }

    /// Remove a finished session. Running sessions are not touched.
    pub(crate) fn clear_finished(&self, id: &str) -> bool {
        self.maps.lock().finished.remove(id).is_some()
    }

    /// Evict finished sessions that ended at least `ttl` ago.
    pub(crate) fn sweep(&self, ttl: Duration) -> Vec<String> {
        let mut maps = self.maps.lock();
        let stale: Vec<String> = maps
            .finished
            .iter()
            .filter(|(_, s)| s.ended.is_some_and(|ended| ended.elapsed() >= ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            maps.finished.remove(id);
        }
        stale
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        let maps = self.maps.lock();
        (maps.running.len(), maps.finished.len())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn session(registry: &JobRegistry, id: &str, agent: &str) -> watch::Receiver<JobStatus> {
        let (tx, rx) = watch::channel(JobStatus::Running);
        let spec = JobSpec::new(agent, "true");
        registry.insert_running(JobSession::new(
            id.to_string(),
            &spec,
            PathBuf::from("/tmp"),
            Duration::from_secs(5),
            JobOutput::new(64, 8),
            tx,
        ));
        rx
    }

    #[test]
    fn test_finalize_moves_session_exactly_once() {
        let registry = JobRegistry::new();
        let rx = session(&registry, "job_a", "main");
        assert_eq!(registry.counts(), (1, 0));

        let first = registry.finalize("job_a", ExitOutcome::code(0), None).unwrap();
        assert_eq!(first.summary.status, JobStatus::Completed);
        assert_eq!(*rx.borrow(), JobStatus::Completed);
        assert_eq!(registry.counts(), (0, 1));

        // A racing timeout must not transition again.
        let second = registry.finalize(
            "job_a",
            ExitOutcome::signalled("SIGKILL"),
            Some(JobStatus::Timeout),
        );
        assert!(second.is_none());
        assert_eq!(registry.counts(), (0, 1));

        let summary = registry.summary("job_a").unwrap();
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.duration_ms, first.summary.duration_ms);
    }

    #[test]
    fn test_override_wins_over_exit_code() {
        let registry = JobRegistry::new();
        session(&registry, "job_b", "main");
        let done = registry
            .finalize("job_b", ExitOutcome::signalled("SIGKILL"), Some(JobStatus::Killed))
            .unwrap();
        assert_eq!(done.summary.status, JobStatus::Killed);
        assert_eq!(done.summary.exit_signal.as_deref(), Some("SIGKILL"));
        assert_eq!(done.summary.exit_code, None);
    }

    #[test]
    fn test_output_after_finalize_is_ignored() {
        let registry = JobRegistry::new();
        session(&registry, "job_c", "main");
        assert!(registry.append_output("job_c", OutputStream::Stdout, "hi"));
        registry.finalize("job_c", ExitOutcome::code(1), None);
        assert!(!registry.append_output("job_c", OutputStream::Stdout, "late"));
        assert!(!registry.record_resources(
            "job_c",
            ResourceStats {
                cpu: 1.0,
                memory: 1,
                sampled_at: Utc::now(),
            }
        ));

        let page = registry.log("job_c", 0, None).unwrap();
        assert_eq!(page.log, "hi");
        assert_eq!(registry.summary("job_c").unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_poll_then_empty_after_finish() {
        let registry = JobRegistry::new();
        session(&registry, "job_d", "main");
        registry.append_output("job_d", OutputStream::Stdout, "a");
        let first = registry.poll("job_d").unwrap();
        assert_eq!(first.delta, "a");
        assert!(!first.done);

        registry.append_output("job_d", OutputStream::Stderr, "b");
        registry.finalize("job_d", ExitOutcome::code(0), None);
        let last = registry.poll("job_d").unwrap();
        assert_eq!(last.delta, "b");
        assert!(last.done);
        assert_eq!(registry.poll("job_d").unwrap().delta, "");
    }

    #[test]
    fn test_clear_only_touches_finished() {
        let registry = JobRegistry::new();
        session(&registry, "job_e", "main");
        assert!(!registry.clear_finished("job_e"));
        assert!(registry.is_running("job_e"));

        registry.finalize("job_e", ExitOutcome::code(0), None);
        assert!(registry.clear_finished("job_e"));
        assert!(registry.summary("job_e").is_none());
        assert!(!registry.clear_finished("job_e"));
    }

    #[test]
    fn test_list_filters_by_agent() {
        let registry = JobRegistry::new();
        session(&registry, "job_f", "alpha");
        session(&registry, "job_g", "beta");
        registry.finalize("job_g", ExitOutcome::code(0), None);

        assert_eq!(registry.list(None).len(), 2);
        let beta = registry.list(Some("beta"));
        assert_eq!(beta.len(), 1);
        assert_eq!(beta[0].id, "job_g");
        assert!(registry.list(Some("gamma")).is_empty());
    }

    #[test]
    fn test_sweep_evicts_only_expired_finished() {
        let registry = JobRegistry::new();
        session(&registry, "job_h", "main");
        session(&registry, "job_i", "main");
        registry.finalize("job_h", ExitOutcome::code(0), None);

        assert!(registry.sweep(Duration::from_secs(3600)).is_empty());
        let swept = registry.sweep(Duration::ZERO);
        assert_eq!(swept, vec!["job_h".to_string()]);
        assert!(registry.is_running("job_i"));
        assert_eq!(registry.counts(), (1, 0));
    }
}
