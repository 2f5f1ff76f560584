#![cfg(unix)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use jobvisor::agent::{
    AgentChunk, AgentConfig, AgentRole, AgentRuntime, AgentStream, StaticAgentDirectory,
};
use jobvisor::channels::{Channel, ChannelManager, OutgoingResponse};
use jobvisor::config::{HeartbeatSettings, JobsConfig};
use jobvisor::error::{AgentError, ChannelError};
use jobvisor::heartbeat::{HeartbeatGuard, HeartbeatStatus};
use jobvisor::jobs::{JobEngine, JobSpec, JobStatus};
use jobvisor::wake::{ConversationWake, ConversationWaker, HeartbeatWaker, WakeBridge};

#[derive(Default)]
struct CountingWaker {
    heartbeats: Mutex<HashMap<String, usize>>,
    turns: Mutex<Vec<ConversationWake>>,
}

impl CountingWaker {
    fn heartbeats_for(&self, agent: &str) -> usize {
        self.heartbeats.lock().get(agent).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HeartbeatWaker for CountingWaker {
    async fn trigger_manual_heartbeat(&self, agent_id: &str) {
        *self
            .heartbeats
            .lock()
            .entry(agent_id.to_string())
            .or_default() += 1;
    }
}

#[async_trait]
impl ConversationWaker for CountingWaker {
    async fn inject_turn(&self, wake: ConversationWake) -> Result<(), AgentError> {
        self.turns.lock().push(wake);
        Ok(())
    }
}

fn wired_engine(waker: &Arc<CountingWaker>) -> JobEngine {
    let conversation: Arc<dyn ConversationWaker> = waker.clone();
    let (bridge, _dispatcher) = WakeBridge::spawn(waker.clone(), Some(conversation), 64);
    JobEngine::with_wake(
        JobsConfig {
            default_yield: Duration::from_millis(500),
            ..JobsConfig::default()
        },
        bridge,
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_every_finalize_wakes_exactly_once() {
    let waker = Arc::new(CountingWaker::default());
    let engine = wired_engine(&waker);

    // Natural exit, failure, timeout, kill and spawn failure.
    engine
        .submit(JobSpec::new("main", "true").with_yield_ms(0))
        .await
        .unwrap();
    engine
        .submit(JobSpec::new("main", "exit 3").with_yield_ms(0))
        .await
        .unwrap();
    engine
        .submit(
            JobSpec::new("main", "sleep 30")
                .with_timeout_secs(1)
                .with_yield_ms(0),
        )
        .await
        .unwrap();
    let killed = engine
        .submit(JobSpec::new("main", "sleep 30").in_background())
        .await
        .unwrap();
    engine.kill(&killed.summary.id);
    engine.kill(&killed.summary.id);
    engine
        .submit(JobSpec::new("main", "true").with_cwd("/nonexistent/jobvisor"))
        .await
        .unwrap();

    settle().await;
    assert_eq!(waker.heartbeats_for("main"), 5);
    assert!(waker.turns.lock().is_empty());
}

#[tokio::test]
async fn test_conversation_mode_also_injects_turn() {
    let waker = Arc::new(CountingWaker::default());
    let engine = wired_engine(&waker);

    let result = engine
        .submit(
            JobSpec::new("main", "echo built")
                .waking_conversation("session-1", "user-1", Some("nightly build".to_string()))
                .with_yield_ms(0),
        )
        .await
        .unwrap();
    assert_eq!(result.summary.status, JobStatus::Completed);

    settle().await;
    assert_eq!(waker.heartbeats_for("main"), 1);
    let turns = waker.turns.lock();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].job_id, result.summary.id);
    assert_eq!(turns[0].session_id.as_deref(), Some("session-1"));
    assert_eq!(turns[0].context.as_deref(), Some("nightly build"));
    assert_eq!(turns[0].tail, "built\n");
}

#[tokio::test]
async fn test_shutdown_does_not_wake() {
    let waker = Arc::new(CountingWaker::default());
    let engine = wired_engine(&waker);
    engine
        .submit(JobSpec::new("main", "sleep 30").in_background())
        .await
        .unwrap();

    assert_eq!(engine.shutdown(), 1);
    settle().await;
    assert_eq!(waker.heartbeats_for("main"), 0);
}

struct ReportingRuntime;

#[async_trait]
impl AgentRuntime for ReportingRuntime {
    async fn run_agent(
        &self,
        _agent_id: &str,
        _prompt: &str,
        _role: AgentRole,
    ) -> Result<AgentStream, AgentError> {
        let chunks = vec![Ok(AgentChunk::Result {
            text: "Build job finished: 1 failure".to_string(),
        })];
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

struct InboxChannel {
    inbox: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Channel for InboxChannel {
    fn name(&self) -> &str {
        "inbox"
    }

    async fn broadcast(
        &self,
        _recipient: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.inbox.lock().push(response.content);
        Ok(())
    }
}

#[tokio::test]
async fn test_job_completion_drives_heartbeat_delivery() {
    let inbox = Arc::new(Mutex::new(Vec::new()));
    let channels = ChannelManager::new();
    channels
        .add(Box::new(InboxChannel {
            inbox: Arc::clone(&inbox),
        }))
        .await;

    let directory = StaticAgentDirectory::new([AgentConfig::new("main")
        .with_heartbeat_prompt("- [ ] Report finished jobs")
        .with_delivery("inbox")]);
    let guard = Arc::new(HeartbeatGuard::new(
        HeartbeatSettings::default(),
        Arc::new(directory),
        Arc::new(ReportingRuntime),
        Arc::new(channels),
    ));
    let mut events = guard.subscribe();

    let (bridge, _dispatcher) = WakeBridge::spawn(guard.clone(), None, 16);
    let engine = JobEngine::with_wake(JobsConfig::default(), bridge);
    engine
        .submit(JobSpec::new("main", "exit 1").with_yield_ms(0))
        .await
        .unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.agent_id, "main");
    assert_eq!(event.status, HeartbeatStatus::Sent);
    assert_eq!(
        *inbox.lock(),
        vec!["Build job finished: 1 failure".to_string()]
    );
}
