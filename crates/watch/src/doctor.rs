//! Instance diagnostics.
//!
//! Two entry points: `diagnose` produces a structured finding list
//! (reachability, config drift, channel auth, service profile) for the CLI
//! and the API; `run_doctor` produces the compact pass/fail summary the
//! remediation path and the doctor command consume.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use agent_client::HealthReport;

use crate::alerts::types::{AlertSeverity, RemediationAction};
use crate::error::WatchError;
use crate::model::ChannelAuthState;
use crate::poller::HealthPoller;
use crate::store::{ChannelAuthStore, ConnectionStore, InstanceStore, SnapshotStore};

/// What part of the instance a finding concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Reachability,
    ConfigDrift,
    ChannelAuth,
    ServiceProfile,
}

/// One diagnostic finding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_action: Option<RemediationAction>,
}

impl Finding {
    fn new(
        category: FindingCategory,
        severity: AlertSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            detail: None,
            repair_action: None,
        }
    }

    fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    fn with_repair(mut self, action: RemediationAction) -> Self {
        self.repair_action = Some(action);
        self
    }
}

/// Full diagnostic report for one instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub instance_id: Uuid,
    pub instance_name: String,
    pub findings: Vec<Finding>,
    pub criticals: usize,
    pub errors: usize,
    pub warnings: usize,
}

impl DoctorReport {
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.criticals == 0 && self.errors == 0
    }
}

/// Compact pass/fail summary used by the remediation path.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorSummary {
    pub config_valid: bool,
    pub gateway_reachable: bool,
    /// Channel type and whether its link is up
    pub channels: Vec<(String, bool)>,
    pub overall_pass: bool,
}

pub struct Doctor {
    instances: Arc<dyn InstanceStore>,
    connections: Arc<dyn ConnectionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    auth_sessions: Arc<dyn ChannelAuthStore>,
    poller: Arc<HealthPoller>,
}

impl Doctor {
    #[must_use]
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        connections: Arc<dyn ConnectionStore>,
        snapshots: Arc<dyn SnapshotStore>,
        auth_sessions: Arc<dyn ChannelAuthStore>,
        poller: Arc<HealthPoller>,
    ) -> Self {
        Self {
            instances,
            connections,
            snapshots,
            auth_sessions,
            poller,
        }
    }

    /// Run the full diagnostic battery against one instance.
    pub async fn diagnose(&self, instance_id: Uuid) -> Result<DoctorReport, WatchError> {
        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or(WatchError::InstanceNotFound(instance_id))?;

        let mut findings = Vec::new();

        // Reachability: live probe, refreshing the snapshot as a side effect
        let deep = self.poller.deep_health(instance_id).await?;
        if deep.reachable {
            if !deep.snapshot.ok {
                findings.push(
                    Finding::new(
                        FindingCategory::Reachability,
                        AlertSeverity::Error,
                        "agent is reachable but reports unhealthy",
                    )
                    .with_detail(json!({ "state": deep.status.state }))
                    .with_repair(RemediationAction::Restart),
                );
            }
        } else {
            findings.push(
                Finding::new(
                    FindingCategory::Reachability,
                    AlertSeverity::Critical,
                    "agent could not be reached",
                )
                .with_repair(RemediationAction::Restart),
            );
        }

        // Config drift: desired hash vs the hash the agent reports applied
        let connection = self.connections.get(instance_id).await;
        let applied = connection
            .as_ref()
            .and_then(|c| c.config_hash.as_deref());
        if let (Some(desired), Some(applied)) = (instance.config_hash.as_deref(), applied) {
            if desired != applied {
                findings.push(
                    Finding::new(
                        FindingCategory::ConfigDrift,
                        AlertSeverity::Error,
                        format!("applied config {applied} differs from desired {desired}"),
                    )
                    .with_detail(json!({ "desired": desired, "applied": applied }))
                    .with_repair(RemediationAction::Reconcile),
                );
            }
        }

        // Channel auth audit
        let now = Utc::now();
        for session in self.auth_sessions.list_for(instance_id).await {
            match session.state {
                ChannelAuthState::Expired | ChannelAuthState::Error => {
                    findings.push(
                        Finding::new(
                            FindingCategory::ChannelAuth,
                            AlertSeverity::Error,
                            format!("channel '{}' pairing is {:?}", session.channel_type, session.state),
                        )
                        .with_detail(json!({
                            "channel_type": session.channel_type,
                            "last_error": session.last_error,
                            "attempt_count": session.attempt_count,
                        }))
                        .with_repair(RemediationAction::RePairChannel),
                    );
                }
                ChannelAuthState::Paired => {
                    if let Some(expires_at) = session.expires_at {
                        if expires_at <= now + Duration::hours(24) {
                            findings.push(
                                Finding::new(
                                    FindingCategory::ChannelAuth,
                                    AlertSeverity::Warning,
                                    format!(
                                        "channel '{}' pairing expires within 24h",
                                        session.channel_type
                                    ),
                                )
                                .with_detail(json!({ "expires_at": expires_at })),
                            );
                        }
                    }
                }
                ChannelAuthState::Pending => {
                    findings.push(Finding::new(
                        FindingCategory::ChannelAuth,
                        AlertSeverity::Warning,
                        format!("channel '{}' pairing is still pending", session.channel_type),
                    ));
                }
            }
        }

        // Service profile sanity
        if instance.config_hash.is_none() {
            findings.push(Finding::new(
                FindingCategory::ServiceProfile,
                AlertSeverity::Warning,
                "instance has no desired config hash recorded",
            ));
        }
        if connection.is_none() {
            findings.push(
                Finding::new(
                    FindingCategory::ServiceProfile,
                    AlertSeverity::Critical,
                    "no connection record is registered",
                )
                .with_repair(RemediationAction::Restart),
            );
        }
        let linked_channels = self
            .snapshots
            .latest(instance_id)
            .await
            .map_or(0, |s| s.channels_linked);
        if linked_channels == 0 {
            findings.push(Finding::new(
                FindingCategory::ServiceProfile,
                AlertSeverity::Warning,
                "no chat channels are linked",
            ));
        }

        let report = DoctorReport {
            instance_id,
            instance_name: instance.name,
            criticals: count(&findings, AlertSeverity::Critical),
            errors: count(&findings, AlertSeverity::Error),
            warnings: count(&findings, AlertSeverity::Warning),
            findings,
        };
        debug!(
            %instance_id,
            criticals = report.criticals,
            errors = report.errors,
            warnings = report.warnings,
            "diagnosis complete"
        );
        Ok(report)
    }

    /// Compact pass/fail view for the `run-doctor` remediation and CLI.
    pub async fn run_doctor(&self, instance_id: Uuid) -> Result<DoctorSummary, WatchError> {
        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or(WatchError::InstanceNotFound(instance_id))?;

        let deep = self.poller.deep_health(instance_id).await?;

        let applied = self
            .connections
            .get(instance_id)
            .await
            .and_then(|c| c.config_hash);
        let config_valid = match (&instance.config_hash, &applied) {
            (Some(desired), Some(applied)) => desired == applied,
            // Unknown on either side is not treated as invalid
            _ => true,
        };

        let channels: Vec<(String, bool)> = if deep.reachable {
            deep.snapshot
                .channels
                .iter()
                .map(|c| (c.channel_type.clone(), c.ok))
                .collect()
        } else {
            self.snapshots
                .latest(instance_id)
                .await
                .and_then(|s| serde_json::from_value::<HealthReport>(s.raw).ok())
                .map(|r| {
                    r.channels
                        .iter()
                        .map(|c| (c.channel_type.clone(), c.ok))
                        .collect()
                })
                .unwrap_or_default()
        };

        let overall_pass =
            deep.reachable && config_valid && channels.iter().all(|(_, ok)| *ok);

        Ok(DoctorSummary {
            config_valid,
            gateway_reachable: deep.reachable,
            channels,
            overall_pass,
        })
    }
}

fn count(findings: &[Finding], severity: AlertSeverity) -> usize {
    findings.iter().filter(|f| f.severity == severity).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MockAgentConnector;
    use crate::model::{ChannelAuthSession, Connection, Instance};
    use crate::poller::PollerConfig;
    use crate::store::{
        MemoryChannelAuthStore, MemoryConnectionStore, MemoryInstanceStore, MemorySnapshotStore,
    };
    use agent_client::{AgentError, ChannelHealth, StatusReport};

    struct Fixture {
        instances: Arc<MemoryInstanceStore>,
        connections: Arc<MemoryConnectionStore>,
        snapshots: Arc<MemorySnapshotStore>,
        auth_sessions: Arc<MemoryChannelAuthStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                instances: Arc::new(MemoryInstanceStore::new()),
                connections: Arc::new(MemoryConnectionStore::new()),
                snapshots: Arc::new(MemorySnapshotStore::new()),
                auth_sessions: Arc::new(MemoryChannelAuthStore::new()),
            }
        }

        fn doctor(&self, connector: MockAgentConnector) -> Doctor {
            let poller = Arc::new(HealthPoller::new(
                self.instances.clone(),
                self.connections.clone(),
                self.snapshots.clone(),
                Arc::new(connector),
                PollerConfig {
                    call_timeout_ms: 1_000,
                    max_in_flight: 10,
                },
            ));
            Doctor::new(
                self.instances.clone(),
                self.connections.clone(),
                self.snapshots.clone(),
                self.auth_sessions.clone(),
                poller,
            )
        }

        async fn seed(&self) -> Instance {
            let mut instance = Instance::new("bot-1", Uuid::new_v4());
            instance.config_hash = Some("abc".into());
            self.instances.upsert(instance.clone()).await;
            self.connections
                .upsert(Connection::new(instance.id, "10.0.0.5", 18789))
                .await;
            instance
        }
    }

    fn reachable_connector(status_hash: &str, channels: Vec<ChannelHealth>) -> MockAgentConnector {
        let hash = status_hash.to_string();
        let mut connector = MockAgentConnector::new();
        connector.expect_check_deep().returning(move |_, _| {
            Ok((
                HealthReport {
                    ok: true,
                    channels: channels.clone(),
                    uptime: 60,
                },
                StatusReport {
                    state: "RUNNING".into(),
                    version: "1.0.0".into(),
                    config_hash: Some(hash.clone()),
                },
                12,
            ))
        });
        connector
    }

    #[tokio::test]
    async fn test_healthy_instance_passes() {
        let fixture = Fixture::new();
        let instance = fixture.seed().await;
        let doctor = fixture.doctor(reachable_connector(
            "abc",
            vec![ChannelHealth {
                name: "ops".into(),
                channel_type: "slack".into(),
                ok: true,
            }],
        ));

        let summary = doctor.run_doctor(instance.id).await.unwrap();
        assert!(summary.gateway_reachable);
        assert!(summary.config_valid);
        assert!(summary.overall_pass);

        let report = doctor.diagnose(instance.id).await.unwrap();
        assert!(report.healthy());
    }

    #[tokio::test]
    async fn test_unreachable_agent_fails_doctor() {
        let fixture = Fixture::new();
        let instance = fixture.seed().await;
        let mut connector = MockAgentConnector::new();
        connector
            .expect_check_deep()
            .returning(|_, _| Err(AgentError::Timeout { timeout_ms: 1_000 }));
        let doctor = fixture.doctor(connector);

        let summary = doctor.run_doctor(instance.id).await.unwrap();
        assert!(!summary.gateway_reachable);
        assert!(!summary.overall_pass);

        let report = doctor.diagnose(instance.id).await.unwrap();
        assert!(!report.healthy());
        assert!(report
            .findings
            .iter()
            .any(|f| f.category == FindingCategory::Reachability
                && f.severity == AlertSeverity::Critical));
    }

    #[tokio::test]
    async fn test_drifted_config_flagged_with_reconcile() {
        let fixture = Fixture::new();
        let instance = fixture.seed().await;
        // Agent reports a different applied hash; deep_health records it
        let doctor = fixture.doctor(reachable_connector("xyz", vec![]));

        let summary = doctor.run_doctor(instance.id).await.unwrap();
        assert!(!summary.config_valid);
        assert!(!summary.overall_pass);

        let report = doctor.diagnose(instance.id).await.unwrap();
        let drift = report
            .findings
            .iter()
            .find(|f| f.category == FindingCategory::ConfigDrift)
            .unwrap();
        assert_eq!(drift.repair_action, Some(RemediationAction::Reconcile));
    }

    #[tokio::test]
    async fn test_broken_pairing_flagged_with_repair() {
        let fixture = Fixture::new();
        let instance = fixture.seed().await;
        fixture
            .auth_sessions
            .upsert(ChannelAuthSession::new(
                instance.id,
                "telegram",
                ChannelAuthState::Expired,
            ))
            .await;
        let doctor = fixture.doctor(reachable_connector("abc", vec![]));

        let report = doctor.diagnose(instance.id).await.unwrap();
        let finding = report
            .findings
            .iter()
            .find(|f| f.category == FindingCategory::ChannelAuth)
            .unwrap();
        assert_eq!(finding.severity, AlertSeverity::Error);
        assert_eq!(finding.repair_action, Some(RemediationAction::RePairChannel));
    }

    #[tokio::test]
    async fn test_missing_instance_errors() {
        let fixture = Fixture::new();
        let doctor = fixture.doctor(MockAgentConnector::new());
        let err = doctor.diagnose(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WatchError::InstanceNotFound(_)));
    }
}
