//! Channel manager for routing agent output to named channels.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::channels::{Channel, Delivery, LogChannel, OutgoingResponse, SYSTEM_CHANNEL};
use crate::error::ChannelError;

/// Holds the registered channels and routes deliveries to them.
pub struct ChannelManager {
    channels: Arc<RwLock<HashMap<String, Box<dyn Channel>>>>,
    system_channel: String,
}

impl ChannelManager {
    /// Create a manager whose system channel is a [`LogChannel`].
    pub fn new() -> Self {
        let mut channels: HashMap<String, Box<dyn Channel>> = HashMap::new();
        channels.insert(SYSTEM_CHANNEL.to_string(), Box::new(LogChannel::default()));
        Self {
            channels: Arc::new(RwLock::new(channels)),
            system_channel: SYSTEM_CHANNEL.to_string(),
        }
    }

    /// Route system deliveries to `name` instead of the log channel.
    pub fn with_system_channel(mut self, name: impl Into<String>) -> Self {
        self.system_channel = name.into();
        self
    }

    pub fn system_channel(&self) -> &str {
        &self.system_channel
    }

    /// Add a channel, replacing any channel with the same name.
    pub async fn add(&self, channel: Box<dyn Channel>) {
        let name = channel.name().to_string();
        self.channels.write().await.insert(name.clone(), channel);
        tracing::debug!("Added channel: {}", name);
    }

    /// Broadcast a message to a recipient on a specific channel.
    pub async fn broadcast(
        &self,
        channel_name: &str,
        recipient: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channels = self.channels.read().await;
        if let Some(channel) = channels.get(channel_name) {
            channel.broadcast(recipient, response).await
        } else {
            Err(ChannelError::NotFound {
                name: channel_name.to_string(),
            })
        }
    }

    /// Get list of channel names.
    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

fn agent_message(agent_id: &str, text: &str) -> OutgoingResponse {
    OutgoingResponse::text(text).with_metadata(serde_json::json!({
        "source": "heartbeat",
        "agent_id": agent_id,
    }))
}

#[async_trait]
impl Delivery for ChannelManager {
    async fn deliver_to_channel(
        &self,
        channel: &str,
        agent_id: &str,
        text: &str,
    ) -> Result<(), ChannelError> {
        self.broadcast(channel, agent_id, agent_message(agent_id, text))
            .await
    }

    async fn deliver_to_system_channel(
        &self,
        agent_id: &str,
        text: &str,
    ) -> Result<(), ChannelError> {
        self.broadcast(&self.system_channel, agent_id, agent_message(agent_id, text))
            .await
    }
}
