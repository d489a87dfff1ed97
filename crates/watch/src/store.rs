//! Entity store traits and in-memory implementations.
//!
//! The persistent store for instances, fleets, connections and the cost
//! pipeline lives outside this crate; the control loop talks to it through
//! these traits. The in-memory implementations back the test suite and the
//! standalone `fleetwatch` binary.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    BudgetConfig, ChannelAuthSession, ChannelAuthState, Connection, ConnectionStatus, CostEvent,
    Fleet, HealthSnapshot, HealthState, Instance, InstanceStatus,
};

/// Read/write access to instance records.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn list(&self) -> Vec<Instance>;
    async fn get(&self, id: Uuid) -> Option<Instance>;
    async fn list_by_fleet(&self, fleet_id: Uuid) -> Vec<Instance>;
    async fn upsert(&self, instance: Instance);

    /// Successful poll: write derived health, clear the error counters and
    /// stamp the check time.
    async fn record_health(&self, id: Uuid, health: HealthState, checked_at: DateTime<Utc>);

    /// Failed poll: mark unhealthy, bump the error counter, keep the message.
    async fn record_poll_failure(&self, id: Uuid, error: &str);

    async fn set_status(&self, id: Uuid, status: InstanceStatus);

    /// Reset the failure counters without touching health (remediation path).
    async fn clear_errors(&self, id: Uuid);
}

/// Read/write access to connection records.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get(&self, instance_id: Uuid) -> Option<Connection>;
    async fn upsert(&self, connection: Connection);
    async fn mark_connected(&self, instance_id: Uuid, heartbeat: DateTime<Utc>, latency_ms: u64);
    async fn mark_error(&self, instance_id: Uuid, heartbeat: DateTime<Utc>);
    /// Record the config hash the remote agent reports as applied.
    async fn set_reported_hash(&self, instance_id: Uuid, config_hash: Option<String>);
}

/// Append-only snapshot store, queried most-recent-first.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn insert(&self, snapshot: HealthSnapshot);
    async fn latest(&self, instance_id: Uuid) -> Option<HealthSnapshot>;
    async fn recent(&self, instance_id: Uuid, limit: usize) -> Vec<HealthSnapshot>;
}

/// Channel auth sessions; read-only except for the bulk re-pair reset.
#[async_trait]
pub trait ChannelAuthStore: Send + Sync {
    async fn list_for(&self, instance_id: Uuid) -> Vec<ChannelAuthSession>;
    async fn upsert(&self, session: ChannelAuthSession);
    /// Reset every EXPIRED/ERROR session for the instance back to PENDING,
    /// clearing the error and attempt counters. Returns how many were reset.
    async fn reset_failed(&self, instance_id: Uuid) -> usize;
}

/// Budget configs; read-only.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Active budgets scoped to the instance directly or to its fleet.
    async fn applicable(&self, instance_id: Uuid, fleet_id: Uuid) -> Vec<BudgetConfig>;
    async fn upsert(&self, budget: BudgetConfig);
}

/// Cost events; read-only, append-only.
#[async_trait]
pub trait CostEventStore: Send + Sync {
    async fn insert(&self, event: CostEvent);
    async fn for_instance_since(&self, instance_id: Uuid, since: DateTime<Utc>) -> Vec<CostEvent>;
}

/// Fleet records; read-only.
#[async_trait]
pub trait FleetStore: Send + Sync {
    async fn list(&self) -> Vec<Fleet>;
    async fn get(&self, id: Uuid) -> Option<Fleet>;
    async fn upsert(&self, fleet: Fleet);
}

// ---------------------------------------------------------------------------
// In-memory implementations
// ---------------------------------------------------------------------------

/// Thread-safe in-memory instance store.
#[derive(Debug, Clone, Default)]
pub struct MemoryInstanceStore {
    records: Arc<RwLock<Vec<Instance>>>,
}

impl MemoryInstanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<F: FnOnce(&mut Instance)>(&self, id: Uuid, f: F) {
        if let Ok(mut records) = self.records.write() {
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                f(record);
            }
        }
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn list(&self) -> Vec<Instance> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    async fn get(&self, id: Uuid) -> Option<Instance> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.iter().find(|i| i.id == id).cloned())
    }

    async fn list_by_fleet(&self, fleet_id: Uuid) -> Vec<Instance> {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|i| i.fleet_id == fleet_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn upsert(&self, instance: Instance) {
        if let Ok(mut records) = self.records.write() {
            if let Some(existing) = records.iter_mut().find(|r| r.id == instance.id) {
                *existing = instance;
            } else {
                records.push(instance);
            }
        }
    }

    async fn record_health(&self, id: Uuid, health: HealthState, checked_at: DateTime<Utc>) {
        self.with_record(id, |r| {
            r.health = health;
            r.error_count = 0;
            r.last_error = None;
            r.last_health_check_at = Some(checked_at);
        });
    }

    async fn record_poll_failure(&self, id: Uuid, error: &str) {
        self.with_record(id, |r| {
            r.health = HealthState::Unhealthy;
            r.error_count += 1;
            r.last_error = Some(error.to_string());
        });
    }

    async fn set_status(&self, id: Uuid, status: InstanceStatus) {
        self.with_record(id, |r| r.status = status);
    }

    async fn clear_errors(&self, id: Uuid) {
        self.with_record(id, |r| {
            r.error_count = 0;
            r.last_error = None;
        });
    }
}

/// Thread-safe in-memory connection store.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnectionStore {
    records: Arc<RwLock<Vec<Connection>>>,
}

impl MemoryConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<F: FnOnce(&mut Connection)>(&self, instance_id: Uuid, f: F) {
        if let Ok(mut records) = self.records.write() {
            if let Some(record) = records.iter_mut().find(|r| r.instance_id == instance_id) {
                f(record);
            }
        }
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get(&self, instance_id: Uuid) -> Option<Connection> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.iter().find(|c| c.instance_id == instance_id).cloned())
    }

    async fn upsert(&self, connection: Connection) {
        if let Ok(mut records) = self.records.write() {
            if let Some(existing) = records
                .iter_mut()
                .find(|r| r.instance_id == connection.instance_id)
            {
                *existing = connection;
            } else {
                records.push(connection);
            }
        }
    }

    async fn mark_connected(&self, instance_id: Uuid, heartbeat: DateTime<Utc>, latency_ms: u64) {
        self.with_record(instance_id, |c| {
            c.status = ConnectionStatus::Connected;
            c.last_heartbeat = Some(heartbeat);
            c.latency_ms = Some(latency_ms);
        });
    }

    async fn mark_error(&self, instance_id: Uuid, heartbeat: DateTime<Utc>) {
        self.with_record(instance_id, |c| {
            c.status = ConnectionStatus::Error;
            c.last_heartbeat = Some(heartbeat);
        });
    }

    async fn set_reported_hash(&self, instance_id: Uuid, config_hash: Option<String>) {
        self.with_record(instance_id, |c| c.config_hash = config_hash);
    }
}

/// Append-only in-memory snapshot store.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    records: Arc<RwLock<Vec<HealthSnapshot>>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn insert(&self, snapshot: HealthSnapshot) {
        if let Ok(mut records) = self.records.write() {
            records.push(snapshot);
        }
    }

    async fn latest(&self, instance_id: Uuid) -> Option<HealthSnapshot> {
        self.recent(instance_id, 1).await.into_iter().next()
    }

    async fn recent(&self, instance_id: Uuid, limit: usize) -> Vec<HealthSnapshot> {
        let mut matching: Vec<HealthSnapshot> = self
            .records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|s| s.instance_id == instance_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by(|a, b| b.captured_at.cmp(&a.captured_at));
        matching.truncate(limit);
        matching
    }
}

/// In-memory channel auth session store.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannelAuthStore {
    records: Arc<RwLock<Vec<ChannelAuthSession>>>,
}

impl MemoryChannelAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelAuthStore for MemoryChannelAuthStore {
    async fn list_for(&self, instance_id: Uuid) -> Vec<ChannelAuthSession> {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|s| s.instance_id == instance_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn upsert(&self, session: ChannelAuthSession) {
        if let Ok(mut records) = self.records.write() {
            if let Some(existing) = records.iter_mut().find(|r| r.id == session.id) {
                *existing = session;
            } else {
                records.push(session);
            }
        }
    }

    async fn reset_failed(&self, instance_id: Uuid) -> usize {
        let mut reset = 0;
        if let Ok(mut records) = self.records.write() {
            for session in records.iter_mut().filter(|s| {
                s.instance_id == instance_id
                    && matches!(s.state, ChannelAuthState::Expired | ChannelAuthState::Error)
            }) {
                session.state = ChannelAuthState::Pending;
                session.last_error = None;
                session.attempt_count = 0;
                reset += 1;
            }
        }
        reset
    }
}

/// In-memory budget store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBudgetStore {
    records: Arc<RwLock<Vec<BudgetConfig>>>,
}

impl MemoryBudgetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BudgetStore for MemoryBudgetStore {
    async fn applicable(&self, instance_id: Uuid, fleet_id: Uuid) -> Vec<BudgetConfig> {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|b| {
                        b.is_active
                            && (b.instance_id == Some(instance_id) || b.fleet_id == Some(fleet_id))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn upsert(&self, budget: BudgetConfig) {
        if let Ok(mut records) = self.records.write() {
            if let Some(existing) = records.iter_mut().find(|r| r.id == budget.id) {
                *existing = budget;
            } else {
                records.push(budget);
            }
        }
    }
}

/// Append-only in-memory cost event store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCostEventStore {
    records: Arc<RwLock<Vec<CostEvent>>>,
}

impl MemoryCostEventStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CostEventStore for MemoryCostEventStore {
    async fn insert(&self, event: CostEvent) {
        if let Ok(mut records) = self.records.write() {
            records.push(event);
        }
    }

    async fn for_instance_since(&self, instance_id: Uuid, since: DateTime<Utc>) -> Vec<CostEvent> {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|e| e.instance_id == instance_id && e.occurred_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-memory fleet store.
#[derive(Debug, Clone, Default)]
pub struct MemoryFleetStore {
    records: Arc<RwLock<Vec<Fleet>>>,
}

impl MemoryFleetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FleetStore for MemoryFleetStore {
    async fn list(&self) -> Vec<Fleet> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    async fn get(&self, id: Uuid) -> Option<Fleet> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.iter().find(|f| f.id == id).cloned())
    }

    async fn upsert(&self, fleet: Fleet) {
        if let Ok(mut records) = self.records.write() {
            if let Some(existing) = records.iter_mut().find(|r| r.id == fleet.id) {
                *existing = fleet;
            } else {
                records.push(fleet);
            }
        }
    }
}
