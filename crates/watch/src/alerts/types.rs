//! Core types for the alert system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of alert rules.
///
/// At most one non-resolved alert exists per `(rule, instance)` pair; the
/// pair is the composite key every store operation is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    UnreachableInstance,
    DegradedInstance,
    ConfigDrift,
    ChannelAuthExpired,
    HealthCheckFailed,
    TokenSpike,
    BudgetWarning,
    BudgetCritical,
}

impl AlertRule {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnreachableInstance => "unreachable_instance",
            Self::DegradedInstance => "degraded_instance",
            Self::ConfigDrift => "config_drift",
            Self::ChannelAuthExpired => "channel_auth_expired",
            Self::HealthCheckFailed => "health_check_failed",
            Self::TokenSpike => "token_spike",
            Self::BudgetWarning => "budget_warning",
            Self::BudgetCritical => "budget_critical",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::UnreachableInstance => "Instance Unreachable",
            Self::DegradedInstance => "Instance Degraded",
            Self::ConfigDrift => "Config Drift",
            Self::ChannelAuthExpired => "Channel Auth Expired",
            Self::HealthCheckFailed => "Health Check Failed",
            Self::TokenSpike => "Token Usage Spike",
            Self::BudgetWarning => "Budget Warning",
            Self::BudgetCritical => "Budget Critical",
        }
    }
}

impl std::fmt::Display for AlertRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

impl AlertSeverity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl From<AlertSeverity> for notify::Severity {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Critical => Self::Critical,
            AlertSeverity::Error => Self::Error,
            AlertSeverity::Warning => Self::Warning,
            AlertSeverity::Info => Self::Info,
        }
    }
}

/// Lifecycle status of an alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Suppressed,
}

/// The fixed set of corrective operations an alert can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationAction {
    #[serde(rename = "restart")]
    Restart,
    #[serde(rename = "reconcile")]
    Reconcile,
    #[serde(rename = "re-pair-channel")]
    RePairChannel,
    #[serde(rename = "run-doctor")]
    RunDoctor,
    #[serde(rename = "review_costs")]
    ReviewCosts,
}

impl RemediationAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::Reconcile => "reconcile",
            Self::RePairChannel => "re-pair-channel",
            Self::RunDoctor => "run-doctor",
            Self::ReviewCosts => "review_costs",
        }
    }
}

/// A persisted alert record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub rule: AlertRule,
    pub instance_id: Option<Uuid>,
    pub fleet_id: Option<Uuid>,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub detail: Option<serde_json::Value>,
    pub remediation_action: Option<RemediationAction>,
    pub remediation_note: Option<String>,
    pub first_triggered_at: DateTime<Utc>,
    pub last_triggered_at: DateTime<Utc>,
    pub consecutive_hits: u32,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Payload a rule evaluator produces when its breach condition holds.
///
/// Upserting a draft either creates a fresh ACTIVE alert or updates the
/// existing non-resolved record for the same `(rule, instance)` key.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub rule: AlertRule,
    pub instance_id: Uuid,
    pub fleet_id: Uuid,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub detail: Option<serde_json::Value>,
    pub remediation_action: Option<RemediationAction>,
}

impl AlertDraft {
    #[must_use]
    pub fn new(
        rule: AlertRule,
        instance_id: Uuid,
        fleet_id: Uuid,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            instance_id,
            fleet_id,
            severity,
            title: rule.display_name().to_string(),
            message: message.into(),
            detail: None,
            remediation_action: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    #[must_use]
    pub fn with_remediation(mut self, action: RemediationAction) -> Self {
        self.remediation_action = Some(action);
        self
    }
}

/// Filter for listing alerts. `page` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilter {
    pub instance_id: Option<Uuid>,
    pub fleet_id: Option<Uuid>,
    pub severity: Option<AlertSeverity>,
    pub status: Option<AlertStatus>,
    pub rule: Option<AlertRule>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: usize,
    pub limit: usize,
}

impl Default for AlertFilter {
    fn default() -> Self {
        Self {
            instance_id: None,
            fleet_id: None,
            severity: None,
            status: None,
            rule: None,
            from: None,
            until: None,
            page: 1,
            limit: 50,
        }
    }
}

impl AlertFilter {
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        if let Some(instance_id) = self.instance_id {
            if alert.instance_id != Some(instance_id) {
                return false;
            }
        }
        if let Some(fleet_id) = self.fleet_id {
            if alert.fleet_id != Some(fleet_id) {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if alert.severity != severity {
                return false;
            }
        }
        if let Some(status) = self.status {
            if alert.status != status {
                return false;
            }
        }
        if let Some(rule) = self.rule {
            if alert.rule != rule {
                return false;
            }
        }
        if let Some(from) = self.from {
            if alert.last_triggered_at < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if alert.last_triggered_at > until {
                return false;
            }
        }
        true
    }
}

/// One page of alert records.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPage {
    pub data: Vec<Alert>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}
