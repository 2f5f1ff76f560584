//! Delivery channels for agent output.

mod channel;
mod log_channel;
mod manager;

pub use channel::{Channel, Delivery, OutgoingResponse};
pub use log_channel::LogChannel;
pub use manager::ChannelManager;

/// Name of the default system channel.
pub const SYSTEM_CHANNEL: &str = "system";
