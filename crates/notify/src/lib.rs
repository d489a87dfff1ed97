//! Best-effort alert notification dispatch.
//!
//! The alert engine hands freshly fired or updated alerts to a [`Notifier`],
//! which fans them out to every configured channel without blocking the
//! evaluation cycle: delivery runs on spawned tasks and failures are logged,
//! never propagated.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{AlertEvent, Notifier, Severity};
//!
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Deliver an alert (fire-and-forget)
//! notifier.deliver_alert(AlertEvent::new(
//!     Severity::Critical,
//!     "unreachable_instance",
//!     "bot-1 has not sent a heartbeat for 3 minutes",
//! ));
//! ```
//!
//! # Configuration
//!
//! - `FLEET_WEBHOOK_URL`: JSON webhook URL (enables the webhook channel)
//! - `NOTIFY_DISABLED`: set to "true" to disable all notifications
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`WebhookChannel`] implements generic JSON webhook delivery
//! - [`Notifier`] dispatches events to all enabled channels

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::webhook::WebhookChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{AlertEvent, Severity};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// Manages multiple notification channels and dispatches alert events to all
/// enabled channels in a fire-and-forget manner.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    ///
    /// Auto-detects which channels are configured based on environment
    /// variables and enables them accordingly.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self {
                channels: vec![],
                disabled: true,
            };
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let webhook = WebhookChannel::from_env();
        if webhook.enabled() {
            info!("Webhook notifications enabled");
            channels.push(Arc::new(webhook));
        }

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Deliver an alert to all enabled channels (fire-and-forget).
    ///
    /// Spawns one task per channel and returns immediately; the caller's
    /// evaluation cycle never waits on delivery latency. Errors are logged
    /// but not propagated.
    pub fn deliver_alert(&self, event: AlertEvent) {
        if self.disabled {
            debug!("Notifications disabled, skipping alert event");
            return;
        }

        if self.channels.is_empty() {
            debug!("No channels configured, skipping alert event");
            return;
        }

        let event = Arc::new(event);

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let event = Arc::clone(&event);

            tokio::spawn(async move {
                let channel_name = channel.name();

                if !channel.enabled() {
                    debug!(channel = channel_name, "Channel disabled, skipping");
                    return;
                }

                match channel.send(&event).await {
                    Ok(()) => {
                        debug!(channel = channel_name, rule = %event.rule, "Alert delivered");
                    }
                    Err(e) => {
                        error!(
                            channel = channel_name,
                            rule = %event.rule,
                            error = %e,
                            "Failed to deliver alert notification"
                        );
                    }
                }
            });
        }
    }

    /// Deliver an alert and wait for all channels to complete.
    ///
    /// Unlike [`Notifier::deliver_alert`], this waits for every channel and
    /// collects the per-channel results. Useful for tests or when delivery
    /// confirmation is needed.
    pub async fn deliver_alert_and_wait(
        &self,
        event: AlertEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if self.disabled || self.channels.is_empty() {
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            let channel_name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((channel_name, result));
        }

        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}
