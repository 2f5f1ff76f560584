//! Per-agent heartbeat tick guard.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use super::ack::{is_silent_ack, strip_ack_token};
use super::checklist::build_prompt;
use super::{HeartbeatEvent, HeartbeatSnapshot, HeartbeatStatus, SkipReason};
use crate::agent::{AgentChunk, AgentDirectory, AgentRole, AgentRuntime};
use crate::channels::Delivery;
use crate::config::HeartbeatSettings;
use crate::error::AgentError;
use crate::wake::HeartbeatWaker;

const EVENT_CAPACITY: usize = 256;

/// Heartbeat state of one agent. Created on the first tick, never removed.
#[derive(Debug, Default)]
struct AgentState {
    running: bool,
    last_text: Option<String>,
    last_sent: Option<Instant>,
    last_sent_at: Option<DateTime<Utc>>,
    last_status: Option<HeartbeatStatus>,
    last_skip_reason: Option<SkipReason>,
    last_run_at: Option<DateTime<Utc>>,
    last_duration_ms: Option<u64>,
}

/// What a claimed tick produced.
struct Verdict {
    status: HeartbeatStatus,
    reason: Option<SkipReason>,
    text: Option<String>,
    error: Option<String>,
}

impl Verdict {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            status: HeartbeatStatus::Skipped,
            reason: Some(reason),
            text: None,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            status: HeartbeatStatus::Failed,
            reason: None,
            text: None,
            error: Some(error.into()),
        }
    }
}

type States = Mutex<HashMap<String, AgentState>>;

/// Holds an agent's `running` flag for the duration of a tick and clears it
/// on drop, including when the tick future is dropped or unwinds.
struct RunningClaim<'a> {
    states: &'a States,
    agent_id: String,
}

impl Drop for RunningClaim<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.states.lock().get_mut(&self.agent_id) {
            state.running = false;
        }
    }
}

/// Decides, per agent and per tick, whether to run the agent, suppress its
/// reply or deliver it.
pub struct HeartbeatGuard {
    settings: HeartbeatSettings,
    directory: Arc<dyn AgentDirectory>,
    runtime: Arc<dyn AgentRuntime>,
    delivery: Arc<dyn Delivery>,
    states: States,
    events: broadcast::Sender<HeartbeatEvent>,
}

impl HeartbeatGuard {
    pub fn new(
        settings: HeartbeatSettings,
        directory: Arc<dyn AgentDirectory>,
        runtime: Arc<dyn AgentRuntime>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            directory,
            runtime,
            delivery,
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Run one guarded tick for `agent_id`.
    ///
    /// Never fails: runtime errors and panics become a `failed` outcome. The
    /// outcome is logged, emitted as a `heartbeat:status` event and returned.
    pub async fn tick(&self, agent_id: &str) -> HeartbeatEvent {
        let started = Instant::now();
        let at = Utc::now();

        let verdict = match self.claim(agent_id) {
            None => Verdict::skipped(SkipReason::AlreadyRunning),
            Some(claim) => {
                let verdict = match AssertUnwindSafe(self.evaluate(agent_id))
                    .catch_unwind()
                    .await
                {
                    Ok(verdict) => verdict,
                    Err(_) => Verdict::failed("heartbeat tick panicked"),
                };
                drop(claim);
                verdict
            }
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        // An overlapping tick leaves the in-flight tick's state alone.
        if verdict.reason != Some(SkipReason::AlreadyRunning) {
            self.record(agent_id, &verdict, at, duration_ms);
        }

        let event = HeartbeatEvent {
            agent_id: agent_id.to_string(),
            status: verdict.status,
            reason: verdict.reason,
            text: verdict.text,
            error: verdict.error,
            duration_ms,
            at,
        };
        log_outcome(&event);
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        event
    }

    /// Atomically flip `running` from false to true.
    fn claim(&self, agent_id: &str) -> Option<RunningClaim<'_>> {
        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();
        if state.running {
            return None;
        }
        state.running = true;
        Some(RunningClaim {
            states: &self.states,
            agent_id: agent_id.to_string(),
        })
    }

    fn record(&self, agent_id: &str, verdict: &Verdict, at: DateTime<Utc>, duration_ms: u64) {
        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();
        state.last_status = Some(verdict.status);
        state.last_skip_reason = verdict.reason;
        state.last_run_at = Some(at);
        state.last_duration_ms = Some(duration_ms);
    }

    /// The guard chain after the running claim, then the agent run, ack
    /// check, dedup and delivery.
    async fn evaluate(&self, agent_id: &str) -> Verdict {
        let Some(agent) = self.directory.agent(agent_id) else {
            return Verdict::skipped(SkipReason::UnknownAgent);
        };
        if !agent.enabled || !agent.heartbeat.enabled {
            return Verdict::skipped(SkipReason::AgentDisabled);
        }
        if let Some(hours) = &agent.heartbeat.active_hours {
            if !hours.is_active(Utc::now()) {
                return Verdict::skipped(SkipReason::QuietHours);
            }
        }
        let Some(prompt) = agent.heartbeat.prompt.as_deref().and_then(build_prompt) else {
            return Verdict::skipped(SkipReason::EmptyInstructions);
        };

        let reply = match self.run_agent(agent_id, &prompt).await {
            Ok(reply) => reply,
            Err(e) => return Verdict::failed(e.to_string()),
        };

        let stripped = strip_ack_token(&reply);
        if is_silent_ack(&stripped, self.settings.ack_max_chars) {
            return Verdict {
                status: HeartbeatStatus::OkToken,
                reason: None,
                text: None,
                error: None,
            };
        }
        let text = stripped.text;

        if self.is_duplicate_or_record(agent_id, &text) {
            return Verdict {
                status: HeartbeatStatus::Skipped,
                reason: Some(SkipReason::Duplicate),
                text: Some(text),
                error: None,
            };
        }

        let delivered = match agent.delivery.as_deref() {
            Some(channel) => {
                self.delivery
                    .deliver_to_channel(channel, agent_id, &text)
                    .await
            }
            None => self.delivery.deliver_to_system_channel(agent_id, &text).await,
        };
        if let Err(e) = delivered {
            tracing::warn!(agent_id = %agent_id, "Heartbeat delivery failed: {}", e);
        }

        Verdict {
            status: HeartbeatStatus::Sent,
            reason: None,
            text: Some(text),
            error: None,
        }
    }

    /// True if `text` repeats the last delivery within the dedup window;
    /// otherwise records it as the last delivery.
    fn is_duplicate_or_record(&self, agent_id: &str, text: &str) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(agent_id.to_string()).or_default();
        let within_window = state
            .last_sent
            .is_some_and(|sent| sent.elapsed() < self.settings.dedup_window);
        if within_window && state.last_text.as_deref() == Some(text) {
            return true;
        }
        state.last_text = Some(text.to_string());
        state.last_sent = Some(Instant::now());
        state.last_sent_at = Some(Utc::now());
        false
    }

    /// Run the agent with the heartbeat role and collect its reply text.
    async fn run_agent(&self, agent_id: &str, prompt: &str) -> Result<String, AgentError> {
        let mut stream = self
            .runtime
            .run_agent(agent_id, prompt, AgentRole::Heartbeat)
            .await?;

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                AgentChunk::Text { text } => reply.push_str(&text),
                AgentChunk::Result { text } => reply = text,
                AgentChunk::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    tracing::debug!(
                        agent_id = %agent_id,
                        input_tokens,
                        output_tokens,
                        "Heartbeat token usage"
                    );
                }
            }
        }
        Ok(reply)
    }

    /// Snapshot of one agent's heartbeat state.
    pub fn status(&self, agent_id: &str) -> Option<HeartbeatSnapshot> {
        self.states
            .lock()
            .get(agent_id)
            .map(|state| snapshot(agent_id, state))
    }

    /// Snapshots of every agent that has ticked at least once.
    pub fn statuses(&self) -> Vec<HeartbeatSnapshot> {
        let states = self.states.lock();
        let mut all: Vec<HeartbeatSnapshot> = states
            .iter()
            .map(|(id, state)| snapshot(id, state))
            .collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Receive `heartbeat:status` events.
    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    /// `heartbeat:status` events as a stream. Lagged events are skipped.
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = HeartbeatEvent> + Send>> {
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|e| async move { e.ok() });
        Box::pin(stream)
    }

    /// Start one interval loop per agent with an enabled heartbeat.
    ///
    /// Loops skip the immediate first tick. Abort the returned handles to
    /// stop them.
    pub fn spawn_scheduler(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for agent_id in self.directory.agent_ids() {
            let Some(agent) = self.directory.agent(&agent_id) else {
                continue;
            };
            if !agent.enabled || !agent.heartbeat.enabled {
                tracing::info!(agent_id = %agent_id, "Heartbeat is disabled, not starting loop");
                continue;
            }
            let every = agent
                .heartbeat
                .interval()
                .unwrap_or(self.settings.default_interval);
            tracing::info!(
                agent_id = %agent_id,
                "Starting heartbeat loop with interval {:?}",
                every
            );

            let guard = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(every.max(Duration::from_millis(1)));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                // Don't run immediately on startup
                interval.tick().await;
                loop {
                    interval.tick().await;
                    guard.tick(&agent_id).await;
                }
            }));
        }
        handles
    }
}

fn snapshot(agent_id: &str, state: &AgentState) -> HeartbeatSnapshot {
    HeartbeatSnapshot {
        agent_id: agent_id.to_string(),
        running: state.running,
        last_status: state.last_status,
        last_skip_reason: state.last_skip_reason,
        last_sent_at: state.last_sent_at,
        last_run_at: state.last_run_at,
        last_duration_ms: state.last_duration_ms,
    }
}

fn log_outcome(event: &HeartbeatEvent) {
    match event.status {
        HeartbeatStatus::Failed => tracing::error!(
            agent_id = %event.agent_id,
            duration_ms = event.duration_ms,
            "Heartbeat failed: {}",
            event.error.as_deref().unwrap_or("unknown error")
        ),
        HeartbeatStatus::Skipped => tracing::info!(
            agent_id = %event.agent_id,
            duration_ms = event.duration_ms,
            reason = %event.reason.map(|r| r.to_string()).unwrap_or_default(),
            "Heartbeat skipped"
        ),
        status => tracing::info!(
            agent_id = %event.agent_id,
            duration_ms = event.duration_ms,
            status = %status,
            "Heartbeat finished"
        ),
    }
}

#[async_trait]
impl HeartbeatWaker for HeartbeatGuard {
    async fn trigger_manual_heartbeat(&self, agent_id: &str) {
        self.tick(agent_id).await;
    }
}
