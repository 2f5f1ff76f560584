//! Channel trait and message types.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ChannelError;

/// Message pushed to a channel.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse {
    /// The content to send.
    pub content: String,
    /// Channel-specific metadata for the message.
    pub metadata: serde_json::Value,
}

impl OutgoingResponse {
    /// Create a simple text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An outbound delivery channel (chat bridge, webhook, log sink, ...).
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name (e.g., "system", "slack", "telegram").
    fn name(&self) -> &str;

    /// Send a proactive message to a recipient on this channel.
    ///
    /// Used for heartbeat output and other agent-initiated communication.
    async fn broadcast(
        &self,
        recipient: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError>;
}

/// Fire-and-forget text delivery on behalf of an agent.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver_to_channel(
        &self,
        channel: &str,
        agent_id: &str,
        text: &str,
    ) -> Result<(), ChannelError>;

    async fn deliver_to_system_channel(
        &self,
        agent_id: &str,
        text: &str,
    ) -> Result<(), ChannelError>;
}
