//! End-to-end exercises of the control loop against in-memory stores and
//! scripted agent connectors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use agent_client::{AgentError, HealthReport, StatusReport};
use notify::{AlertEvent, ChannelError, Notifier, NotifyChannel};
use watch::alerts::{
    AlertEngine, AlertFilter, AlertRule, AlertStatus, AlertStore, MemoryAlertStore,
    RemediationAction,
};
use watch::config::RuleConfig;
use watch::connector::AgentConnector;
use watch::model::{Connection, ConnectionStatus, Instance, InstanceStatus};
use watch::poller::{HealthPoller, PollerConfig};
use watch::remediate::{InstanceReconciler, RemediationDispatcher};
use watch::store::{
    ConnectionStore, InstanceStore, MemoryBudgetStore, MemoryChannelAuthStore,
    MemoryConnectionStore, MemoryCostEventStore, MemoryInstanceStore, MemorySnapshotStore,
};

/// Connector that tracks the in-flight high-water mark.
struct GaugedConnector {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl GaugedConnector {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentConnector for GaugedConnector {
    async fn check_health(
        &self,
        _connection: &Connection,
        _timeout_ms: u64,
    ) -> Result<(HealthReport, u64), AgentError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // Hold the slot long enough for the fan-out to pile up
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok((
            HealthReport {
                ok: true,
                channels: vec![],
                uptime: 60,
            },
            5,
        ))
    }

    async fn check_deep(
        &self,
        _connection: &Connection,
        _timeout_ms: u64,
    ) -> Result<(HealthReport, StatusReport, u64), AgentError> {
        Err(AgentError::Protocol("not scripted".into()))
    }
}

/// Connector that always fails.
struct DownConnector;

#[async_trait]
impl AgentConnector for DownConnector {
    async fn check_health(
        &self,
        _connection: &Connection,
        _timeout_ms: u64,
    ) -> Result<(HealthReport, u64), AgentError> {
        Err(AgentError::Timeout { timeout_ms: 100 })
    }

    async fn check_deep(
        &self,
        _connection: &Connection,
        _timeout_ms: u64,
    ) -> Result<(HealthReport, StatusReport, u64), AgentError> {
        Err(AgentError::Timeout { timeout_ms: 100 })
    }
}

/// Channel whose delivery always bounces.
struct RejectingChannel;

#[async_trait]
impl NotifyChannel for RejectingChannel {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, _event: &AlertEvent) -> Result<(), ChannelError> {
        Err(ChannelError::Rejected { status: 500 })
    }
}

struct Harness {
    instances: Arc<MemoryInstanceStore>,
    connections: Arc<MemoryConnectionStore>,
    alerts: Arc<MemoryAlertStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            instances: Arc::new(MemoryInstanceStore::new()),
            connections: Arc::new(MemoryConnectionStore::new()),
            alerts: Arc::new(MemoryAlertStore::new()),
        }
    }

    fn poller(&self, connector: Arc<dyn AgentConnector>, max_in_flight: usize) -> Arc<HealthPoller> {
        Arc::new(HealthPoller::new(
            self.instances.clone(),
            self.connections.clone(),
            Arc::new(MemorySnapshotStore::new()),
            connector,
            PollerConfig {
                call_timeout_ms: 1_000,
                max_in_flight,
            },
        ))
    }

    fn engine(&self) -> AlertEngine {
        self.engine_with(Notifier::disabled())
    }

    fn engine_with(&self, notifier: Notifier) -> AlertEngine {
        AlertEngine::new(
            self.instances.clone(),
            self.connections.clone(),
            Arc::new(MemoryChannelAuthStore::new()),
            Arc::new(MemoryBudgetStore::new()),
            Arc::new(MemoryCostEventStore::new()),
            self.alerts.clone(),
            Arc::new(notifier),
            RuleConfig::default(),
        )
    }

    async fn seed_instance(&self) -> Instance {
        let instance = Instance::new("bot", Uuid::new_v4());
        self.instances.upsert(instance.clone()).await;
        self.connections
            .upsert(Connection::new(instance.id, "10.0.0.5", 18789))
            .await;
        instance
    }

    async fn alert_for(&self, rule: AlertRule, instance_id: Uuid) -> Option<watch::alerts::Alert> {
        let filter = AlertFilter {
            rule: Some(rule),
            instance_id: Some(instance_id),
            ..AlertFilter::default()
        };
        self.alerts.list(&filter).await.data.into_iter().next()
    }
}

#[tokio::test]
async fn test_poll_fanout_respects_concurrency_ceiling() {
    let harness = Harness::new();
    for _ in 0..25 {
        harness.seed_instance().await;
    }

    let connector = Arc::new(GaugedConnector::new());
    let poller = harness.poller(connector.clone(), 10);

    let summary = poller.poll_all().await;
    assert_eq!(summary.eligible, 25);
    assert_eq!(summary.polled, 25);
    assert_eq!(summary.failed, 0);
    assert!(
        connector.max_in_flight.load(Ordering::SeqCst) <= 10,
        "observed {} concurrent sessions",
        connector.max_in_flight.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_unreachable_alert_fires_then_resolves_across_ticks() {
    let harness = Harness::new();
    let instance = harness.seed_instance().await;

    // Dead connection, heartbeat well past the window
    let mut connection = Connection::new(instance.id, "10.0.0.5", 18789);
    connection.status = ConnectionStatus::Error;
    connection.last_heartbeat = Some(Utc::now() - chrono::Duration::minutes(10));
    harness.connections.upsert(connection).await;

    let engine = harness.engine();
    let summary = engine.evaluate_all().await;
    assert!(summary.fired >= 1);

    let alert = harness
        .alert_for(AlertRule::UnreachableInstance, instance.id)
        .await
        .expect("unreachable alert");
    assert_eq!(alert.status, AlertStatus::Active);
    let first_id = alert.id;

    // A second breaching tick updates the same record
    engine.evaluate_all().await;
    let alert = harness
        .alert_for(AlertRule::UnreachableInstance, instance.id)
        .await
        .unwrap();
    assert_eq!(alert.id, first_id);
    assert_eq!(alert.consecutive_hits, 2);

    // Connection comes back: next tick resolves
    harness
        .connections
        .mark_connected(instance.id, Utc::now(), 8)
        .await;
    let summary = engine.evaluate_all().await;
    assert!(summary.resolved >= 1);

    let alert = harness
        .alert_for(AlertRule::UnreachableInstance, instance.id)
        .await
        .unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);
    assert!(alert.resolved_at.is_some());
}

#[tokio::test]
async fn test_failed_notification_delivery_does_not_fail_the_tick() {
    let harness = Harness::new();
    let instance = harness.seed_instance().await;

    // Dead connection, heartbeat well past the window
    let mut connection = Connection::new(instance.id, "10.0.0.5", 18789);
    connection.status = ConnectionStatus::Error;
    connection.last_heartbeat = Some(Utc::now() - chrono::Duration::minutes(10));
    harness.connections.upsert(connection).await;

    // Every delivery bounces with HTTP 500
    let engine = harness.engine_with(Notifier::with_channels(vec![Arc::new(RejectingChannel)]));

    let summary = engine.evaluate_all().await;
    assert!(summary.fired >= 1);
    assert_eq!(summary.errors, 0);

    // The alert is recorded despite the delivery failure
    let alert = harness
        .alert_for(AlertRule::UnreachableInstance, instance.id)
        .await
        .expect("unreachable alert");
    assert_eq!(alert.status, AlertStatus::Active);

    // And subsequent ticks keep running
    let summary = engine.evaluate_all().await;
    assert_eq!(summary.errors, 0);
    let alert = harness
        .alert_for(AlertRule::UnreachableInstance, instance.id)
        .await
        .unwrap();
    assert_eq!(alert.consecutive_hits, 2);
}

#[tokio::test]
async fn test_health_check_alert_needs_three_consecutive_failures() {
    let harness = Harness::new();
    let instance = harness.seed_instance().await;
    let poller = harness.poller(Arc::new(DownConnector), 10);
    let engine = harness.engine();

    for expected_count in 1..=3u32 {
        poller.poll_all().await;
        engine.evaluate_all().await;

        let stored = harness.instances.get(instance.id).await.unwrap();
        assert_eq!(stored.error_count, expected_count);

        let alert = harness
            .alert_for(AlertRule::HealthCheckFailed, instance.id)
            .await;
        if expected_count < 3 {
            assert!(
                alert.is_none(),
                "fired after only {expected_count} failure(s)"
            );
        } else {
            let alert = alert.expect("alert at the threshold");
            assert_eq!(alert.status, AlertStatus::Active);
            assert_eq!(alert.remediation_action, Some(RemediationAction::Restart));
        }
    }
}

#[tokio::test]
async fn test_restart_remediation_clears_failures_and_resolves() {
    let harness = Harness::new();
    let mut instance = Instance::new("bot", Uuid::new_v4());
    instance.status = InstanceStatus::Degraded;
    let instance_id = instance.id;
    harness.instances.upsert(instance).await;
    harness
        .connections
        .upsert(Connection::new(instance_id, "10.0.0.5", 18789))
        .await;

    // Drive the instance into the failed state
    let poller = harness.poller(Arc::new(DownConnector), 10);
    let engine = harness.engine();
    for _ in 0..3 {
        poller.poll_all().await;
    }
    engine.evaluate_all().await;
    let alert = harness
        .alert_for(AlertRule::HealthCheckFailed, instance_id)
        .await
        .expect("health check alert");

    // Remediate: restart via the reconciler
    let dispatcher = RemediationDispatcher::new(
        harness.alerts.clone(),
        Arc::new(MemoryChannelAuthStore::new()),
        poller,
        Arc::new(InstanceReconciler::new(harness.instances.clone())),
    );
    let outcome = dispatcher.execute(alert.id).await.unwrap();
    assert!(outcome.success);

    let stored = harness.instances.get(instance_id).await.unwrap();
    assert_eq!(stored.status, InstanceStatus::Running);
    assert_eq!(stored.error_count, 0);

    let alert = harness.alerts.get(alert.id).await.unwrap();
    assert_eq!(alert.status, AlertStatus::Resolved);

    // The next evaluation tick stays quiet for this rule
    engine.evaluate_all().await;
    let filter = AlertFilter {
        rule: Some(AlertRule::HealthCheckFailed),
        instance_id: Some(instance_id),
        status: Some(AlertStatus::Active),
        ..AlertFilter::default()
    };
    assert_eq!(harness.alerts.list(&filter).await.total, 0);
}
