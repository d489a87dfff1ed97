//! Notification channel implementations.

pub mod webhook;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::AlertEvent;

/// Trait for notification channels (webhooks, chat bridges, etc.).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send an alert event to this channel.
    async fn send(&self, event: &AlertEvent) -> Result<(), ChannelError>;
}
