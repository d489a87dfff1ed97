//! Alert evaluation engine.
//!
//! A registry of independent rule evaluators runs once per evaluation tick
//! over every instance that is not being created or torn down. Each
//! evaluator is pure with respect to its inputs and produces exactly one
//! verdict per instance per tick: fire (upsert against the alert store),
//! resolve, or skip. Evaluators are isolated by the `(rule, instance)`
//! composite key, so a failure in one never blocks the others.
//!
//! # Rules
//! - `unreachable_instance`: connection missing or dead past the heartbeat window
//! - `degraded_instance`: degraded health persisting past the threshold
//! - `config_drift`: applied config hash differs from the desired one
//! - `channel_auth_expired`: any channel pairing in EXPIRED/ERROR
//! - `health_check_failed`: consecutive poll failures at the threshold
//! - `token_spike`: recent token rate far above the trailing baseline
//! - `budget_warning` / `budget_critical`: worst applicable budget breach

pub mod budget;
pub mod channel_auth;
pub mod config_drift;
pub mod degraded;
pub mod health_check;
pub mod store;
pub mod token_spike;
pub mod types;
pub mod unreachable;

pub use store::{AlertStore, MemoryAlertStore};
pub use types::{
    Alert, AlertDraft, AlertFilter, AlertPage, AlertRule, AlertSeverity, AlertStatus,
    RemediationAction,
};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use notify::{AlertEvent, Notifier};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RuleConfig;
use crate::error::WatchError;
use crate::model::{BudgetConfig, ChannelAuthSession, Connection, CostEvent, Instance};
use crate::store::{
    BudgetStore, ChannelAuthStore, ConnectionStore, CostEventStore, InstanceStore,
};

/// Everything a rule evaluator may look at for one instance.
pub struct EvalContext {
    pub instance: Instance,
    pub connection: Option<Connection>,
    pub auth_sessions: Vec<ChannelAuthSession>,
    pub budgets: Vec<BudgetConfig>,
    /// Cost events covering at least the spike windows and the current month
    pub cost_events: Vec<CostEvent>,
    pub now: DateTime<Utc>,
    pub rules: RuleConfig,
}

/// Outcome of evaluating one rule against one instance.
#[derive(Debug)]
pub enum Verdict {
    /// Breach: upsert this draft
    Fire(AlertDraft),
    /// Condition clear: resolve the composite key if an alert exists
    Resolve,
    /// Not enough data to say either way; touch nothing
    Skip,
}

/// One alert rule evaluator.
pub trait RuleEvaluator: Send + Sync {
    fn rule(&self) -> AlertRule;

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError>;
}

/// The full rule battery.
#[must_use]
pub fn default_evaluators() -> Vec<Box<dyn RuleEvaluator>> {
    vec![
        Box::new(unreachable::UnreachableInstance),
        Box::new(degraded::DegradedInstance),
        Box::new(config_drift::ConfigDrift),
        Box::new(channel_auth::ChannelAuthExpired),
        Box::new(health_check::HealthCheckFailed),
        Box::new(token_spike::TokenSpike),
        Box::new(budget::BudgetWarning),
        Box::new(budget::BudgetCritical),
    ]
}

/// Counters for one evaluation tick.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EvaluationSummary {
    pub instances: usize,
    pub fired: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Drives the rule battery over the fleet and applies verdicts to the
/// alert store, handing fired alerts to the notifier fire-and-forget.
pub struct AlertEngine {
    instances: Arc<dyn InstanceStore>,
    connections: Arc<dyn ConnectionStore>,
    auth_sessions: Arc<dyn ChannelAuthStore>,
    budgets: Arc<dyn BudgetStore>,
    cost_events: Arc<dyn CostEventStore>,
    alert_store: Arc<dyn AlertStore>,
    notifier: Arc<Notifier>,
    evaluators: Vec<Box<dyn RuleEvaluator>>,
    config: RuleConfig,
}

impl AlertEngine {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        connections: Arc<dyn ConnectionStore>,
        auth_sessions: Arc<dyn ChannelAuthStore>,
        budgets: Arc<dyn BudgetStore>,
        cost_events: Arc<dyn CostEventStore>,
        alert_store: Arc<dyn AlertStore>,
        notifier: Arc<Notifier>,
        config: RuleConfig,
    ) -> Self {
        let evaluators = default_evaluators()
            .into_iter()
            .filter(|e| config.is_enabled(e.rule()))
            .collect();
        Self {
            instances,
            connections,
            auth_sessions,
            budgets,
            cost_events,
            alert_store,
            notifier,
            evaluators,
            config,
        }
    }

    /// Run one evaluation tick over every evaluable instance.
    pub async fn evaluate_all(&self) -> EvaluationSummary {
        let now = Utc::now();
        let mut summary = EvaluationSummary::default();

        for instance in self.instances.list().await {
            if !instance.status.evaluable() {
                continue;
            }
            summary.instances += 1;
            let instance_id = instance.id;
            let ctx = self.context_for(instance, now).await;

            for evaluator in &self.evaluators {
                match evaluator.evaluate(&ctx) {
                    Ok(Verdict::Fire(draft)) => {
                        let alert = self.alert_store.upsert(draft).await;
                        debug!(
                            rule = %alert.rule,
                            %instance_id,
                            hits = alert.consecutive_hits,
                            "alert fired"
                        );
                        summary.fired += 1;
                        self.notify(&alert);
                    }
                    Ok(Verdict::Resolve) => {
                        if let Some(alert) = self
                            .alert_store
                            .resolve_by_key(evaluator.rule(), instance_id)
                            .await
                        {
                            info!(rule = %alert.rule, %instance_id, "alert resolved");
                            summary.resolved += 1;
                        }
                    }
                    Ok(Verdict::Skip) => summary.skipped += 1,
                    Err(e) => {
                        warn!(
                            rule = %evaluator.rule(),
                            %instance_id,
                            error = %e,
                            "rule evaluation failed; continuing with remaining rules"
                        );
                        summary.errors += 1;
                    }
                }
            }
        }

        summary
    }

    async fn context_for(&self, instance: Instance, now: DateTime<Utc>) -> EvalContext {
        let connection = self.connections.get(instance.id).await;
        let auth_sessions = self.auth_sessions.list_for(instance.id).await;
        let budgets = self
            .budgets
            .applicable(instance.id, instance.fleet_id)
            .await;

        // Wide enough for both the spike windows and month-to-date spend,
        // whichever reaches further back.
        let spike_window = Duration::minutes(
            self.config.spike_recent_mins + self.config.spike_baseline_mins,
        );
        let since = budget::month_start(now).min(now - spike_window);
        let cost_events = self.cost_events.for_instance_since(instance.id, since).await;

        EvalContext {
            instance,
            connection,
            auth_sessions,
            budgets,
            cost_events,
            now,
            rules: self.config.clone(),
        }
    }

    /// Best-effort notification; delivery runs on spawned tasks and never
    /// feeds back into the tick.
    fn notify(&self, alert: &Alert) {
        let mut event = AlertEvent::new(
            alert.severity.into(),
            alert.rule.as_str(),
            alert.message.clone(),
        )
        .with_title(alert.title.clone());
        if let Some(instance_id) = alert.instance_id {
            event = event.with_instance(instance_id);
        }
        if let Some(detail) = &alert.detail {
            event = event.with_details(detail.clone());
        }
        self.notifier.deliver_alert(event);
    }
}
