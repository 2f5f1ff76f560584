//! Channel that writes deliveries to the log.

use async_trait::async_trait;

use crate::channels::{Channel, OutgoingResponse};
use crate::error::ChannelError;

/// Default system channel: every message becomes an `info` log line.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new(super::SYSTEM_CHANNEL)
    }
}

#[async_trait]
impl Channel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn broadcast(
        &self,
        recipient: &str,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        tracing::info!(
            channel = %self.name,
            recipient = %recipient,
            metadata = %response.metadata,
            "{}",
            response.content
        );
        Ok(())
    }
}
