//! Agent collaborators.
//!
//! The supervision core does not run models itself. It talks to:
//! - an [`AgentRuntime`] that turns a prompt into a stream of chunks
//! - an [`AgentDirectory`] holding read-only per-agent configuration

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, ConfigError};
use crate::heartbeat::ActiveHours;

/// Why the runtime is being invoked. Conversation turns for finished jobs
/// go through [`ConversationWaker`](crate::wake::ConversationWaker) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Heartbeat,
}

/// One item of an agent's output stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentChunk {
    /// Incremental text.
    Text { text: String },
    /// Final result text, replacing anything streamed so far.
    Result { text: String },
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentChunk, AgentError>> + Send>>;

/// The LLM-calling agent runtime.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run_agent(
        &self,
        agent_id: &str,
        prompt: &str,
        role: AgentRole,
    ) -> Result<AgentStream, AgentError>;
}

/// Heartbeat section of an agent's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentHeartbeatConfig {
    pub enabled: bool,
    /// Tick interval; the global default when unset.
    pub interval_ms: Option<u64>,
    pub active_hours: Option<ActiveHours>,
    /// Heartbeat checklist.
    pub prompt: Option<String>,
}

impl Default for AgentHeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: None,
            active_hours: None,
            prompt: None,
        }
    }
}

impl AgentHeartbeatConfig {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Read-only per-agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub heartbeat: AgentHeartbeatConfig,
    /// Channel heartbeat output is delivered to; the system channel when unset.
    #[serde(default)]
    pub delivery: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AgentConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            heartbeat: AgentHeartbeatConfig::default(),
            delivery: None,
        }
    }

    pub fn with_heartbeat_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.heartbeat.prompt = Some(prompt.into());
        self
    }

    pub fn with_active_hours(mut self, hours: ActiveHours) -> Self {
        self.heartbeat.active_hours = Some(hours);
        self
    }

    pub fn with_delivery(mut self, channel: impl Into<String>) -> Self {
        self.delivery = Some(channel.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Lookup of agent configuration by id.
pub trait AgentDirectory: Send + Sync {
    fn agent(&self, agent_id: &str) -> Option<AgentConfig>;

    fn agent_ids(&self) -> Vec<String>;
}

/// In-memory agent directory.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDirectory {
    agents: HashMap<String, AgentConfig>,
}

impl StaticAgentDirectory {
    pub fn new(agents: impl IntoIterator<Item = AgentConfig>) -> Self {
        Self {
            agents: agents.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    /// Parse a JSON array of agent configurations.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let agents: Vec<AgentConfig> = serde_json::from_str(json)?;
        Ok(Self::new(agents))
    }

    pub fn insert(&mut self, agent: AgentConfig) {
        self.agents.insert(agent.id.clone(), agent);
    }
}

impl AgentDirectory for StaticAgentDirectory {
    fn agent(&self, agent_id: &str) -> Option<AgentConfig> {
        self.agents.get(agent_id).cloned()
    }

    fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }
}
