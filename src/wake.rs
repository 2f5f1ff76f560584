//! Wake bridge from finished jobs to their owning agents.
//!
//! The job engine never calls the heartbeat guard directly. Finalize pushes
//! a [`WakeRequest`] onto a bounded queue and returns; a dispatcher task
//! drains the queue and runs each wake as its own task, logging failures.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AgentError;
use crate::jobs::{JobStatus, JobSummary, WakeMode};

/// Something that can run an out-of-band heartbeat tick for an agent.
#[async_trait]
pub trait HeartbeatWaker: Send + Sync {
    /// Run a tick now. Errors are handled (and logged) by the implementation.
    async fn trigger_manual_heartbeat(&self, agent_id: &str);
}

/// Something that can inject a turn into an existing conversation.
#[async_trait]
pub trait ConversationWaker: Send + Sync {
    async fn inject_turn(&self, wake: ConversationWake) -> Result<(), AgentError>;
}

/// A turn to inject when a conversation-mode job finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationWake {
    pub agent_id: String,
    pub job_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub context: Option<String>,
    pub status: JobStatus,
    pub tail: String,
}

/// Work item on the wake queue.
#[derive(Debug, Clone)]
pub enum WakeRequest {
    Heartbeat { agent_id: String },
    Conversation(ConversationWake),
}

/// Sending half of the wake queue. Cheap to clone.
#[derive(Clone)]
pub struct WakeBridge {
    tx: mpsc::Sender<WakeRequest>,
}

impl WakeBridge {
    /// Start the dispatcher and return the bridge feeding it.
    ///
    /// The dispatcher exits once every bridge clone has been dropped.
    pub fn spawn(
        heartbeat: Arc<dyn HeartbeatWaker>,
        conversation: Option<Arc<dyn ConversationWaker>>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<WakeRequest>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    WakeRequest::Heartbeat { agent_id } => {
                        let waker = Arc::clone(&heartbeat);
                        tokio::spawn(async move {
                            waker.trigger_manual_heartbeat(&agent_id).await;
                        });
                    }
                    WakeRequest::Conversation(wake) => {
                        let Some(waker) = conversation.clone() else {
                            tracing::warn!(
                                agent_id = %wake.agent_id,
                                job_id = %wake.job_id,
                                "No conversation waker configured, dropping conversation wake"
                            );
                            continue;
                        };
                        tokio::spawn(async move {
                            let agent_id = wake.agent_id.clone();
                            let job_id = wake.job_id.clone();
                            if let Err(e) = waker.inject_turn(wake).await {
                                tracing::error!(
                                    agent_id = %agent_id,
                                    job_id = %job_id,
                                    "Conversation wake failed: {}",
                                    e
                                );
                            }
                        });
                    }
                }
            }
            tracing::debug!("Wake dispatcher stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a wake without waiting. A full or closed queue is logged.
    pub fn enqueue(&self, request: WakeRequest) {
        if let Err(e) = self.tx.try_send(request) {
            let (reason, request) = match e {
                mpsc::error::TrySendError::Full(r) => ("queue full", r),
                mpsc::error::TrySendError::Closed(r) => ("queue closed", r),
            };
            tracing::warn!(?request, "Dropping wake request: {}", reason);
        }
    }

    /// Wake the owner of a finished job: always a heartbeat tick, plus a
    /// conversation turn for conversation-mode jobs.
    pub(crate) fn job_finished(&self, summary: &JobSummary, wake_context: Option<String>) {
        self.enqueue(WakeRequest::Heartbeat {
            agent_id: summary.agent_id.clone(),
        });

        if summary.wake_mode == WakeMode::Conversation {
            self.enqueue(WakeRequest::Conversation(ConversationWake {
                agent_id: summary.agent_id.clone(),
                job_id: summary.id.clone(),
                session_id: summary.session_id.clone(),
                user_id: summary.user_id.clone(),
                context: wake_context,
                status: summary.status,
                tail: summary.tail.clone(),
            }));
        }
    }
}
