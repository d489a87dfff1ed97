//! Fleet-level health rollups.
//!
//! Buckets every instance of a fleet into healthy / degraded / unhealthy /
//! unreachable and unions per-channel component health from the latest
//! snapshots. Unreachable is the catch-all bucket: a stopped or errored
//! instance, a dead or missing connection, or health that was never
//! established all land there rather than inventing a health they don't
//! have.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use agent_client::HealthReport;

use crate::error::WatchError;
use crate::model::{ConnectionStatus, HealthState, Instance, InstanceStatus};
use crate::store::{ConnectionStore, FleetStore, InstanceStore, SnapshotStore};

/// Rolled-up link state of one channel component across a fleet.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelComponent {
    pub channel_type: String,
    pub name: String,
    /// Instances reporting this channel linked and ok
    pub healthy: usize,
    /// Instances reporting this channel linked but broken
    pub degraded: usize,
}

/// Health rollup for one fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetHealthView {
    pub fleet_id: Uuid,
    pub fleet_name: String,
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unreachable: usize,
    pub channels: Vec<ChannelComponent>,
}

/// Health rollup across every fleet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceHealthView {
    pub overall: HealthState,
    pub fleets: Vec<FleetHealthView>,
}

pub struct HealthAggregator {
    fleets: Arc<dyn FleetStore>,
    instances: Arc<dyn InstanceStore>,
    connections: Arc<dyn ConnectionStore>,
    snapshots: Arc<dyn SnapshotStore>,
}

enum Bucket {
    Healthy,
    Degraded,
    Unhealthy,
    Unreachable,
}

fn bucket(instance: &Instance, connection_status: Option<ConnectionStatus>) -> Bucket {
    if matches!(instance.status, InstanceStatus::Stopped | InstanceStatus::Error) {
        return Bucket::Unreachable;
    }
    match connection_status {
        None | Some(ConnectionStatus::Error | ConnectionStatus::Disconnected) => {
            return Bucket::Unreachable;
        }
        Some(ConnectionStatus::Connected) => {}
    }
    match instance.health {
        HealthState::Healthy => Bucket::Healthy,
        HealthState::Degraded => Bucket::Degraded,
        HealthState::Unhealthy => Bucket::Unhealthy,
        HealthState::Unknown => Bucket::Unreachable,
    }
}

impl HealthAggregator {
    #[must_use]
    pub fn new(
        fleets: Arc<dyn FleetStore>,
        instances: Arc<dyn InstanceStore>,
        connections: Arc<dyn ConnectionStore>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            fleets,
            instances,
            connections,
            snapshots,
        }
    }

    /// Roll up one fleet.
    pub async fn fleet_health(&self, fleet_id: Uuid) -> Result<FleetHealthView, WatchError> {
        let fleet = self
            .fleets
            .get(fleet_id)
            .await
            .ok_or(WatchError::FleetNotFound(fleet_id))?;

        let instances = self.instances.list_by_fleet(fleet_id).await;
        let mut view = FleetHealthView {
            fleet_id,
            fleet_name: fleet.name,
            total: instances.len(),
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unreachable: 0,
            channels: Vec::new(),
        };

        // Keyed by (type, name) so the union is deterministic and sorted
        let mut channels: BTreeMap<(String, String), ChannelComponent> = BTreeMap::new();

        for instance in &instances {
            let connection_status = self
                .connections
                .get(instance.id)
                .await
                .map(|c| c.status);
            match bucket(instance, connection_status) {
                Bucket::Healthy => view.healthy += 1,
                Bucket::Degraded => view.degraded += 1,
                Bucket::Unhealthy => view.unhealthy += 1,
                Bucket::Unreachable => view.unreachable += 1,
            }

            let Some(snapshot) = self.snapshots.latest(instance.id).await else {
                continue;
            };
            let Ok(report) = serde_json::from_value::<HealthReport>(snapshot.raw) else {
                warn!(instance_id = %instance.id, "snapshot payload no longer parses; skipping channels");
                continue;
            };
            for channel in report.channels {
                let entry = channels
                    .entry((channel.channel_type.clone(), channel.name.clone()))
                    .or_insert_with(|| ChannelComponent {
                        channel_type: channel.channel_type,
                        name: channel.name,
                        healthy: 0,
                        degraded: 0,
                    });
                if channel.ok {
                    entry.healthy += 1;
                } else {
                    entry.degraded += 1;
                }
            }
        }

        view.channels = channels.into_values().collect();
        Ok(view)
    }

    /// Roll up every fleet. A fleet that fails to aggregate is logged and
    /// skipped rather than failing the whole view.
    pub async fn workspace_health(&self) -> WorkspaceHealthView {
        let mut fleets = Vec::new();
        for fleet in self.fleets.list().await {
            match self.fleet_health(fleet.id).await {
                Ok(view) => fleets.push(view),
                Err(e) => warn!(fleet_id = %fleet.id, error = %e, "fleet rollup failed; skipping"),
            }
        }

        let total: usize = fleets.iter().map(|f| f.total).sum();
        let bad: usize = fleets.iter().map(|f| f.unhealthy + f.unreachable).sum();
        let degraded: usize = fleets.iter().map(|f| f.degraded).sum();
        let overall = if total == 0 {
            HealthState::Unknown
        } else if bad > 0 {
            HealthState::Unhealthy
        } else if degraded > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        WorkspaceHealthView { overall, fleets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Connection, Fleet, HealthSnapshot};
    use crate::store::{
        MemoryConnectionStore, MemoryFleetStore, MemoryInstanceStore, MemorySnapshotStore,
    };
    use agent_client::ChannelHealth;
    use chrono::Utc;

    struct Fixture {
        fleets: Arc<MemoryFleetStore>,
        instances: Arc<MemoryInstanceStore>,
        connections: Arc<MemoryConnectionStore>,
        snapshots: Arc<MemorySnapshotStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                fleets: Arc::new(MemoryFleetStore::new()),
                instances: Arc::new(MemoryInstanceStore::new()),
                connections: Arc::new(MemoryConnectionStore::new()),
                snapshots: Arc::new(MemorySnapshotStore::new()),
            }
        }

        fn aggregator(&self) -> HealthAggregator {
            HealthAggregator::new(
                self.fleets.clone(),
                self.instances.clone(),
                self.connections.clone(),
                self.snapshots.clone(),
            )
        }

        async fn seed(
            &self,
            fleet_id: Uuid,
            health: HealthState,
            connection: Option<ConnectionStatus>,
        ) -> Instance {
            let mut instance = Instance::new("bot", fleet_id);
            instance.health = health;
            self.instances.upsert(instance.clone()).await;
            if let Some(status) = connection {
                let mut conn = Connection::new(instance.id, "10.0.0.5", 18789);
                conn.status = status;
                self.connections.upsert(conn).await;
            }
            instance
        }
    }

    #[tokio::test]
    async fn test_buckets_cover_all_cases() {
        let fixture = Fixture::new();
        let fleet = Fleet::new("prod");
        let fleet_id = fleet.id;
        fixture.fleets.upsert(fleet).await;

        fixture
            .seed(fleet_id, HealthState::Healthy, Some(ConnectionStatus::Connected))
            .await;
        fixture
            .seed(fleet_id, HealthState::Degraded, Some(ConnectionStatus::Connected))
            .await;
        fixture
            .seed(fleet_id, HealthState::Unhealthy, Some(ConnectionStatus::Connected))
            .await;
        // Healthy on record but the connection is down: unreachable wins
        fixture
            .seed(fleet_id, HealthState::Healthy, Some(ConnectionStatus::Error))
            .await;
        // No connection at all
        fixture.seed(fleet_id, HealthState::Healthy, None).await;
        // Health never established
        fixture
            .seed(fleet_id, HealthState::Unknown, Some(ConnectionStatus::Connected))
            .await;

        let view = fixture.aggregator().fleet_health(fleet_id).await.unwrap();
        assert_eq!(view.total, 6);
        assert_eq!(view.healthy, 1);
        assert_eq!(view.degraded, 1);
        assert_eq!(view.unhealthy, 1);
        assert_eq!(view.unreachable, 3);
    }

    #[tokio::test]
    async fn test_channel_union_across_instances() {
        let fixture = Fixture::new();
        let fleet = Fleet::new("prod");
        let fleet_id = fleet.id;
        fixture.fleets.upsert(fleet).await;

        let a = fixture
            .seed(fleet_id, HealthState::Healthy, Some(ConnectionStatus::Connected))
            .await;
        let b = fixture
            .seed(fleet_id, HealthState::Healthy, Some(ConnectionStatus::Connected))
            .await;

        let report_a = HealthReport {
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
            uptime: 100,
        };
        let report_b = HealthReport {
            ok: true,
            channels: vec![ChannelHealth {
                name: "ops".into(),
                channel_type: "slack".into(),
                ok: false,
            }],
            uptime: 100,
        };
        fixture
            .snapshots
            .insert(HealthSnapshot::from_report(a.id, &report_a, None, Utc::now()))
            .await;
        fixture
            .snapshots
            .insert(HealthSnapshot::from_report(b.id, &report_b, None, Utc::now()))
            .await;

        let view = fixture.aggregator().fleet_health(fleet_id).await.unwrap();
        assert_eq!(view.channels.len(), 2);

        let slack = view
            .channels
            .iter()
            .find(|c| c.channel_type == "slack")
            .unwrap();
        assert_eq!(slack.healthy, 1);
        assert_eq!(slack.degraded, 1);

        let telegram = view
            .channels
            .iter()
            .find(|c| c.channel_type == "telegram")
            .unwrap();
        assert_eq!(telegram.degraded, 1);
    }

    #[tokio::test]
    async fn test_unknown_fleet_errors() {
        let fixture = Fixture::new();
        let err = fixture
            .aggregator()
            .fleet_health(Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, WatchError::FleetNotFound(_)));
    }

    #[tokio::test]
    async fn test_workspace_overall_health() {
        let fixture = Fixture::new();
        let fleet = Fleet::new("prod");
        let fleet_id = fleet.id;
        fixture.fleets.upsert(fleet).await;

        fixture
            .seed(fleet_id, HealthState::Healthy, Some(ConnectionStatus::Connected))
            .await;
        let view = fixture.aggregator().workspace_health().await;
        assert_eq!(view.overall, HealthState::Healthy);

        fixture
            .seed(fleet_id, HealthState::Degraded, Some(ConnectionStatus::Connected))
            .await;
        let view = fixture.aggregator().workspace_health().await;
        assert_eq!(view.overall, HealthState::Degraded);

        fixture.seed(fleet_id, HealthState::Healthy, None).await;
        let view = fixture.aggregator().workspace_health().await;
        assert_eq!(view.overall, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_empty_workspace_is_unknown() {
        let fixture = Fixture::new();
        let view = fixture.aggregator().workspace_health().await;
        assert_eq!(view.overall, HealthState::Unknown);
        assert!(view.fleets.is_empty());
    }
}
