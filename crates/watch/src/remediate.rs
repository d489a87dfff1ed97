//! Remediation dispatcher.
//!
//! Executes the corrective action an alert carries and writes the outcome
//! back onto the alert record. Execution is total: every path produces an
//! outcome, success or failure, and the only way to not get one is asking
//! about an alert that does not exist. A successful remediation resolves
//! the alert; a failed one leaves it active with a failure note.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alerts::{AlertStore, RemediationAction};
use crate::error::WatchError;
use crate::model::InstanceStatus;
use crate::poller::HealthPoller;
use crate::store::{ChannelAuthStore, InstanceStore};

/// Result of applying a reconcile/restart against an instance.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub success: bool,
    pub changes: Vec<String>,
}

/// Seam to the platform's provisioning layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Re-drive the instance toward its desired state.
    async fn reconcile(&self, instance_id: Uuid) -> Result<ReconcileReport, WatchError>;
}

/// Default reconciler backed by the instance store: resets the instance to
/// RUNNING and clears its failure counters. The real provisioning layer
/// substitutes its own implementation.
pub struct InstanceReconciler {
    instances: Arc<dyn InstanceStore>,
}

impl InstanceReconciler {
    #[must_use]
    pub fn new(instances: Arc<dyn InstanceStore>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl Reconciler for InstanceReconciler {
    async fn reconcile(&self, instance_id: Uuid) -> Result<ReconcileReport, WatchError> {
        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or(WatchError::InstanceNotFound(instance_id))?;

        let mut changes = Vec::new();
        if instance.status != InstanceStatus::Running {
            self.instances
                .set_status(instance_id, InstanceStatus::Running)
                .await;
            changes.push(format!("status {:?} -> RUNNING", instance.status));
        }
        if instance.error_count > 0 || instance.last_error.is_some() {
            self.instances.clear_errors(instance_id).await;
            changes.push(format!("cleared {} recorded error(s)", instance.error_count));
        }

        Ok(ReconcileReport {
            success: true,
            changes,
        })
    }
}

/// Outcome of one remediation attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationOutcome {
    pub success: bool,
    pub action: Option<RemediationAction>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl RemediationOutcome {
    fn success(action: Option<RemediationAction>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            action,
            message: message.into(),
            detail: None,
        }
    }

    fn failure(action: Option<RemediationAction>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            action,
            message: message.into(),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

pub struct RemediationDispatcher {
    alerts: Arc<dyn AlertStore>,
    auth_sessions: Arc<dyn ChannelAuthStore>,
    poller: Arc<HealthPoller>,
    reconciler: Arc<dyn Reconciler>,
}

impl RemediationDispatcher {
    #[must_use]
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        auth_sessions: Arc<dyn ChannelAuthStore>,
        poller: Arc<HealthPoller>,
        reconciler: Arc<dyn Reconciler>,
    ) -> Self {
        Self {
            alerts,
            auth_sessions,
            poller,
            reconciler,
        }
    }

    /// Execute the remediation carried by an alert and record the outcome.
    pub async fn execute(&self, alert_id: Uuid) -> Result<RemediationOutcome, WatchError> {
        let alert = self
            .alerts
            .get(alert_id)
            .await
            .ok_or(WatchError::AlertNotFound(alert_id))?;

        let Some(action) = alert.remediation_action else {
            // Nothing to do is a successful no-op; no note is written
            return Ok(RemediationOutcome::success(
                None,
                "alert carries no remediation action",
            ));
        };

        let Some(instance_id) = alert.instance_id else {
            let outcome = RemediationOutcome::failure(
                Some(action),
                "alert is not tied to an instance; nothing to remediate",
            );
            self.record(alert_id, &outcome).await;
            return Ok(outcome);
        };

        let outcome = match action {
            RemediationAction::Restart | RemediationAction::Reconcile => {
                self.run_reconcile(action, instance_id).await
            }
            RemediationAction::RePairChannel => self.run_repair(instance_id).await,
            RemediationAction::RunDoctor => self.run_doctor(instance_id).await,
            RemediationAction::ReviewCosts => RemediationOutcome::failure(
                Some(action),
                "review_costs requires manual review and cannot be automated",
            ),
        };

        if outcome.success {
            info!(%alert_id, %instance_id, action = action.as_str(), "remediation succeeded");
        } else {
            warn!(%alert_id, %instance_id, action = action.as_str(), message = %outcome.message, "remediation failed");
        }
        self.record(alert_id, &outcome).await;
        Ok(outcome)
    }

    async fn run_reconcile(
        &self,
        action: RemediationAction,
        instance_id: Uuid,
    ) -> RemediationOutcome {
        match self.reconciler.reconcile(instance_id).await {
            Ok(report) if report.success => RemediationOutcome::success(
                Some(action),
                format!("reconciled with {} change(s)", report.changes.len()),
            )
            .with_detail(json!({ "changes": report.changes })),
            Ok(report) => RemediationOutcome::failure(Some(action), "reconcile did not converge")
                .with_detail(json!({ "changes": report.changes })),
            Err(e) => RemediationOutcome::failure(Some(action), e.to_string()),
        }
    }

    async fn run_repair(&self, instance_id: Uuid) -> RemediationOutcome {
        let reset = self.auth_sessions.reset_failed(instance_id).await;
        if reset == 0 {
            return RemediationOutcome::failure(
                Some(RemediationAction::RePairChannel),
                "no failed channel pairings to reset",
            );
        }
        RemediationOutcome::success(
            Some(RemediationAction::RePairChannel),
            format!("reset {reset} channel pairing(s) to PENDING"),
        )
    }

    async fn run_doctor(&self, instance_id: Uuid) -> RemediationOutcome {
        match self.poller.deep_health(instance_id).await {
            Ok(deep) if deep.reachable => RemediationOutcome::success(
                Some(RemediationAction::RunDoctor),
                "doctor probe completed; agent reachable",
            )
            .with_detail(json!({
                "healthy": deep.snapshot.ok,
                "state": deep.status.state,
                "latency_ms": deep.latency_ms,
            })),
            Ok(_) => RemediationOutcome::failure(
                Some(RemediationAction::RunDoctor),
                "doctor probe could not reach the agent",
            ),
            Err(e) => RemediationOutcome::failure(Some(RemediationAction::RunDoctor), e.to_string()),
        }
    }

    async fn record(&self, alert_id: Uuid, outcome: &RemediationOutcome) {
        let note = if outcome.success {
            format!("Success: {}", outcome.message)
        } else {
            format!("Failed: {}", outcome.message)
        };
        if let Err(e) = self
            .alerts
            .record_remediation(alert_id, note, outcome.success)
            .await
        {
            warn!(%alert_id, error = %e, "failed to record remediation outcome");
        }
    }
}
