//! Alert notification payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity levels for alert notifications.
///
/// Ordered from most to least severe; mirrors the alert engine's severity
/// scale so events can be forwarded without translation loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Immediate action required
    Critical,
    /// A breach that needs intervention
    Error,
    /// Something needs attention
    Warning,
    /// Informational - normal operations
    Info,
}

impl Severity {
    /// Embed/attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> u32 {
        match self {
            Self::Critical => 0x00e7_4c3c, // Red
            Self::Error => 0x00c0_392b,    // Dark red
            Self::Warning => 0x00f3_9c12,  // Orange
            Self::Info => 0x0034_98db,     // Blue
        }
    }

    /// Display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Info => "Info",
        }
    }
}

/// A fired or updated alert, as handed to notification channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub severity: Severity,
    /// Stable rule identifier, e.g. `unreachable_instance`
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_instance_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl AlertEvent {
    #[must_use]
    pub fn new(severity: Severity, rule: impl Into<String>, message: impl Into<String>) -> Self {
        let rule = rule.into();
        let message = message.into();
        Self {
            severity,
            title: format!("Fleet Alert: {rule}"),
            rule,
            bot_instance_id: None,
            message,
            details: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_instance(mut self, instance_id: Uuid) -> Self {
        self.bot_instance_id = Some(instance_id);
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
