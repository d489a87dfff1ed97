//! Generic JSON webhook notification channel.
//!
//! Posts the alert event as a severity-colored attachment payload. Works
//! against Slack-compatible incoming webhooks as well as plain JSON
//! receivers (the raw event is embedded under `event`).

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::ChannelError;
use crate::events::AlertEvent;
use crate::NotifyChannel;

/// Environment variable for the webhook URL.
const ENV_WEBHOOK_URL: &str = "FLEET_WEBHOOK_URL";

/// Generic webhook notification channel.
pub struct WebhookChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a webhook channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_WEBHOOK_URL).ok();

        if webhook_url.is_some() {
            debug!("Webhook notifications enabled");
        } else {
            debug!("Webhook notifications disabled (FLEET_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a webhook channel with a specific URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    fn format_payload(event: &AlertEvent) -> WebhookPayload {
        WebhookPayload {
            text: format!("[{}] {}", event.severity.as_str(), event.title),
            color: format!("#{:06x}", event.severity.color()),
            rule: event.rule.clone(),
            message: event.message.clone(),
            event: serde_json::to_value(event).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    text: String,
    color: String,
    rule: String,
    message: String,
    /// Full event for receivers that want the structured form
    event: serde_json::Value,
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), ChannelError> {
        let Some(url) = &self.webhook_url else {
            return Err(ChannelError::NotConfigured(
                "webhook URL not set".to_string(),
            ));
        };

        let payload = Self::format_payload(event);
        let response = self.client.post(url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(rule = %event.rule, "webhook notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;

    #[test]
    fn test_unconfigured_channel_is_disabled() {
        let channel = WebhookChannel {
            webhook_url: None,
            client: reqwest::Client::new(),
        };
        assert!(!channel.enabled());
    }

    #[test]
    fn test_payload_shape() {
        let event = AlertEvent::new(Severity::Critical, "config_drift", "hash mismatch");
        let payload = WebhookChannel::format_payload(&event);
        assert_eq!(payload.text, "[Critical] Fleet Alert: config_drift");
        assert_eq!(payload.color, "#e74c3c");
        assert_eq!(payload.rule, "config_drift");
        assert_eq!(payload.event["rule"], "config_drift");
    }

    #[tokio::test]
    async fn test_send_without_url_errors() {
        let channel = WebhookChannel {
            webhook_url: None,
            client: reqwest::Client::new(),
        };
        let event = AlertEvent::new(Severity::Info, "budget_warning", "80% of budget");
        let err = channel.send(&event).await.expect_err("must fail");
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }
}
