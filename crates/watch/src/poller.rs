//! Health poller.
//!
//! Each poll tick fans out over every RUNNING/DEGRADED instance with a
//! bounded number of in-flight agent sessions. Per instance: open a
//! session, run the health RPC, persist a snapshot and the derived health,
//! and update the connection record. Failures are recorded, never
//! propagated; a tick always completes.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use agent_client::{HealthReport, StatusReport};

use crate::connector::AgentConnector;
use crate::error::WatchError;
use crate::model::{HealthSnapshot, HealthState, Instance};
use crate::store::{ConnectionStore, InstanceStore, SnapshotStore};

/// Counters for one poll tick.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PollSummary {
    /// Instances in a pollable status with a registered connection this tick
    pub eligible: usize,
    /// Polls that produced a snapshot
    pub polled: usize,
    /// Polls that errored (recorded against the instance)
    pub failed: usize,
}

/// Combined health/status view from the deep diagnostic path.
#[derive(Debug, Clone, Serialize)]
pub struct DeepHealth {
    pub snapshot: HealthReport,
    pub status: StatusReport,
    pub latency_ms: Option<u64>,
    /// False when the agent could not be reached; `snapshot` and `status`
    /// hold unknown placeholders in that case
    pub reachable: bool,
}

pub struct PollerConfig {
    pub call_timeout_ms: u64,
    pub max_in_flight: usize,
}

pub struct HealthPoller {
    instances: Arc<dyn InstanceStore>,
    connections: Arc<dyn ConnectionStore>,
    snapshots: Arc<dyn SnapshotStore>,
    connector: Arc<dyn AgentConnector>,
    config: PollerConfig,
}

impl HealthPoller {
    #[must_use]
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        connections: Arc<dyn ConnectionStore>,
        snapshots: Arc<dyn SnapshotStore>,
        connector: Arc<dyn AgentConnector>,
        config: PollerConfig,
    ) -> Self {
        Self {
            instances,
            connections,
            snapshots,
            connector,
            config,
        }
    }

    /// Poll every pollable instance that has a connection, at most
    /// `max_in_flight` concurrently.
    pub async fn poll_all(self: &Arc<Self>) -> PollSummary {
        let mut eligible: Vec<Instance> = Vec::new();
        for instance in self.instances.list().await {
            if !instance.status.pollable() {
                continue;
            }
            if self.connections.get(instance.id).await.is_none() {
                // The unreachable rule owns this condition; there is no poll
                // to fail without a connection to dial
                debug!(instance_id = %instance.id, name = %instance.name, "no connection registered; not polling");
                continue;
            }
            eligible.push(instance);
        }

        let mut summary = PollSummary {
            eligible: eligible.len(),
            ..PollSummary::default()
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight));
        let mut tasks = JoinSet::new();
        for instance in eligible {
            let poller = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closed only if the semaphore is dropped, which it is not
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return false;
                };
                poller.poll_one(&instance).await.is_some()
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => summary.polled += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    warn!(error = %e, "poll task panicked");
                    summary.failed += 1;
                }
            }
        }

        info!(
            eligible = summary.eligible,
            polled = summary.polled,
            failed = summary.failed,
            "poll tick complete"
        );
        summary
    }

    /// Poll one instance. Returns the captured snapshot, or `None` when the
    /// poll failed (the failure is recorded against the instance).
    pub async fn poll_one(&self, instance: &Instance) -> Option<HealthSnapshot> {
        let Some(connection) = self.connections.get(instance.id).await else {
            // The unreachable rule owns this condition; a missing connection
            // is not a consecutive-failure event
            warn!(instance_id = %instance.id, name = %instance.name, "no connection registered; skipping poll");
            return None;
        };

        match self
            .connector
            .check_health(&connection, self.config.call_timeout_ms)
            .await
        {
            Ok((report, latency_ms)) => {
                let now = Utc::now();
                let snapshot =
                    HealthSnapshot::from_report(instance.id, &report, Some(latency_ms), now);
                self.snapshots.insert(snapshot.clone()).await;
                self.connections
                    .mark_connected(instance.id, now, latency_ms)
                    .await;
                let health = if report.ok {
                    HealthState::Healthy
                } else {
                    HealthState::Unhealthy
                };
                self.instances.record_health(instance.id, health, now).await;
                debug!(
                    instance_id = %instance.id,
                    healthy = snapshot.is_healthy,
                    latency_ms,
                    "polled instance"
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(instance_id = %instance.id, error = %e, "health poll failed");
                self.connections.mark_error(instance.id, Utc::now()).await;
                self.instances
                    .record_poll_failure(instance.id, &e.to_string())
                    .await;
                None
            }
        }
    }

    /// On-demand health+status probe used by diagnostics and remediation.
    ///
    /// An unreachable agent is a valid answer here, not an error: the
    /// returned view carries `reachable: false` with unknown placeholders.
    /// Only a missing instance fails.
    pub async fn deep_health(&self, instance_id: uuid::Uuid) -> Result<DeepHealth, WatchError> {
        let instance = self
            .instances
            .get(instance_id)
            .await
            .ok_or(WatchError::InstanceNotFound(instance_id))?;

        let Some(connection) = self.connections.get(instance.id).await else {
            return Ok(DeepHealth {
                snapshot: HealthReport::unknown(),
                status: StatusReport::unknown(),
                latency_ms: None,
                reachable: false,
            });
        };

        match self
            .connector
            .check_deep(&connection, self.config.call_timeout_ms)
            .await
        {
            Ok((report, status, latency_ms)) => {
                let now = Utc::now();
                let snapshot =
                    HealthSnapshot::from_report(instance.id, &report, Some(latency_ms), now);
                self.snapshots.insert(snapshot).await;
                self.connections
                    .mark_connected(instance.id, now, latency_ms)
                    .await;
                self.connections
                    .set_reported_hash(instance.id, status.config_hash.clone())
                    .await;
                Ok(DeepHealth {
                    snapshot: report,
                    status,
                    latency_ms: Some(latency_ms),
                    reachable: true,
                })
            }
            Err(e) => {
                debug!(instance_id = %instance.id, error = %e, "deep health probe failed");
                Ok(DeepHealth {
                    snapshot: HealthReport::unknown(),
                    status: StatusReport::unknown(),
                    latency_ms: None,
                    reachable: false,
                })
            }
        }
    }
}
