//! Domain entities for the fleet control loop.
//!
//! Instances, connections, snapshots and the read-only inputs (channel auth
//! sessions, budgets, cost events) are owned by the platform's entity store;
//! this module defines the shapes the control loop reads and the few fields
//! it writes back (health, error counters, connection state).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agent_client::HealthReport;

/// Lifecycle status of a deployed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Creating,
    Running,
    Degraded,
    Stopped,
    Error,
    Deleting,
}

impl InstanceStatus {
    /// Whether the health poller should reach out to this instance.
    #[must_use]
    pub fn pollable(self) -> bool {
        matches!(self, Self::Running | Self::Degraded)
    }

    /// Whether the alert engine evaluates this instance. Instances being
    /// created or torn down are skipped.
    #[must_use]
    pub fn evaluable(self) -> bool {
        !matches!(self, Self::Creating | Self::Deleting)
    }
}

/// Coarse machine health, derived by the poller from the agent's own `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// One deployed bot-agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub name: String,
    pub fleet_id: Uuid,
    pub status: InstanceStatus,
    pub health: HealthState,
    /// Desired config hash, as provisioned
    pub config_hash: Option<String>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

impl Instance {
    #[must_use]
    pub fn new(name: impl Into<String>, fleet_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            fleet_id,
            status: InstanceStatus::Running,
            health: HealthState::Unknown,
            config_hash: None,
            error_count: 0,
            last_error: None,
            last_health_check_at: None,
        }
    }
}

/// How the control loop authenticates against an instance's agent surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Token,
    Password,
}

/// State of the control loop's connection record for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
}

/// Connection record, one per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub instance_id: Uuid,
    pub host: String,
    pub port: u16,
    pub auth_mode: AuthMode,
    pub auth_secret: String,
    pub status: ConnectionStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    /// Config hash the remote agent last reported as applied; compared
    /// against the instance's desired hash to detect drift
    pub config_hash: Option<String>,
}

impl Connection {
    #[must_use]
    pub fn new(instance_id: Uuid, host: impl Into<String>, port: u16) -> Self {
        Self {
            instance_id,
            host: host.into(),
            port,
            auth_mode: AuthMode::Token,
            auth_secret: String::new(),
            status: ConnectionStatus::Disconnected,
            last_heartbeat: None,
            latency_ms: None,
            config_hash: None,
        }
    }
}

/// Append-only point-in-time health payload captured from an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Raw agent health payload as received on the wire
    pub raw: serde_json::Value,
    pub is_healthy: bool,
    pub channels_linked: u32,
    pub channels_degraded: u32,
    pub gateway_latency_ms: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

impl HealthSnapshot {
    /// Build a snapshot from a wire health report.
    ///
    /// `is_healthy` folds channel degradation in (a linked-but-broken
    /// channel makes the snapshot unhealthy) even though machine-level
    /// health is derived from `ok` alone.
    #[must_use]
    pub fn from_report(
        instance_id: Uuid,
        report: &HealthReport,
        gateway_latency_ms: Option<u64>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        let channels_degraded = report.degraded_channels() as u32;
        Self {
            id: Uuid::new_v4(),
            instance_id,
            raw: serde_json::to_value(report).unwrap_or_default(),
            is_healthy: report.ok && channels_degraded == 0,
            channels_linked: report.channels.len() as u32,
            channels_degraded,
            gateway_latency_ms,
            captured_at,
        }
    }
}

/// Pairing state of one chat channel on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelAuthState {
    Pending,
    Paired,
    Expired,
    Error,
}

/// Per-instance, per-channel-type pairing session. Read-only here except
/// for the bulk reset performed by the re-pair remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAuthSession {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub channel_type: String,
    pub state: ChannelAuthState,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempt_count: u32,
}

impl ChannelAuthSession {
    #[must_use]
    pub fn new(instance_id: Uuid, channel_type: impl Into<String>, state: ChannelAuthState) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            channel_type: channel_type.into(),
            state,
            expires_at: None,
            last_error: None,
            attempt_count: 0,
        }
    }
}

/// Spend budget scoped to a single instance or to a whole fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub id: Uuid,
    pub instance_id: Option<Uuid>,
    pub fleet_id: Option<Uuid>,
    pub monthly_limit_cents: i64,
    pub warn_threshold_pct: f64,
    pub critical_threshold_pct: f64,
    pub is_active: bool,
}

impl BudgetConfig {
    #[must_use]
    pub fn for_instance(instance_id: Uuid, monthly_limit_cents: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: Some(instance_id),
            fleet_id: None,
            monthly_limit_cents,
            warn_threshold_pct: 75.0,
            critical_threshold_pct: 90.0,
            is_active: true,
        }
    }

    #[must_use]
    pub fn for_fleet(fleet_id: Uuid, monthly_limit_cents: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: None,
            fleet_id: Some(fleet_id),
            monthly_limit_cents,
            warn_threshold_pct: 75.0,
            critical_threshold_pct: 90.0,
            is_active: true,
        }
    }
}

/// One token/cost usage record, appended by the cost pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvent {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_cents: i64,
    pub occurred_at: DateTime<Utc>,
}

impl CostEvent {
    #[must_use]
    pub fn new(
        instance_id: Uuid,
        input_tokens: i64,
        output_tokens: i64,
        cost_cents: i64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            input_tokens,
            output_tokens,
            cost_cents,
            occurred_at,
        }
    }

    #[must_use]
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// A named group of instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fleet {
    pub id: Uuid,
    pub name: String,
}

impl Fleet {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_client::ChannelHealth;

    #[test]
    fn test_status_polling_eligibility() {
        assert!(InstanceStatus::Running.pollable());
        assert!(InstanceStatus::Degraded.pollable());
        assert!(!InstanceStatus::Creating.pollable());
        assert!(!InstanceStatus::Stopped.pollable());
        assert!(!InstanceStatus::Deleting.pollable());
    }

    #[test]
    fn test_status_evaluation_eligibility() {
        assert!(InstanceStatus::Running.evaluable());
        assert!(InstanceStatus::Stopped.evaluable());
        assert!(InstanceStatus::Error.evaluable());
        assert!(!InstanceStatus::Creating.evaluable());
        assert!(!InstanceStatus::Deleting.evaluable());
    }

    #[test]
    fn test_snapshot_from_report_counts_channels() {
        let report = HealthReport {
            ok: true,
            channels: vec![
                ChannelHealth {
                    name: "ops".into(),
                    channel_type: "slack".into(),
                    ok: true,
                },
                ChannelHealth {
                    name: "support".into(),
                    channel_type: "telegram".into(),
                    ok: false,
                },
            ],
            uptime: 10,
        };

        let snap = HealthSnapshot::from_report(Uuid::new_v4(), &report, Some(42), Utc::now());
        assert_eq!(snap.channels_linked, 2);
        assert_eq!(snap.channels_degraded, 1);
        // A degraded channel makes the snapshot unhealthy even when ok=true
        assert!(!snap.is_healthy);
        assert_eq!(snap.gateway_latency_ms, Some(42));
    }

    #[test]
    fn test_snapshot_healthy_when_all_channels_ok() {
        let report = HealthReport {
            ok: true,
            channels: vec![],
            uptime: 10,
        };
        let snap = HealthSnapshot::from_report(Uuid::new_v4(), &report, None, Utc::now());
        assert!(snap.is_healthy);
    }
}
