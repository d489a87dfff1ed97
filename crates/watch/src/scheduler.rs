//! Tick scheduler.
//!
//! Two independent tickers drive the control loop: a fast one for health
//! polling and a slower one for alert evaluation. Each tick runs on its own
//! spawned task so a panic inside one tick is contained and logged; the
//! ticker itself never stops until shutdown is signalled.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::alerts::AlertEngine;
use crate::poller::HealthPoller;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub evaluate_interval_secs: u64,
}

pub struct Scheduler {
    poller: Arc<HealthPoller>,
    engine: Arc<AlertEngine>,
    config: SchedulerConfig,
}

impl Scheduler {
    #[must_use]
    pub fn new(poller: Arc<HealthPoller>, engine: Arc<AlertEngine>, config: SchedulerConfig) -> Self {
        Self {
            poller,
            engine,
            config,
        }
    }

    /// One poll tick. Public so the CLI can drive single ticks by hand.
    pub async fn tick_poll(&self) {
        let summary = self.poller.poll_all().await;
        info!(
            eligible = summary.eligible,
            polled = summary.polled,
            failed = summary.failed,
            "poll tick"
        );
    }

    /// One evaluation tick.
    pub async fn tick_evaluate(&self) {
        let summary = self.engine.evaluate_all().await;
        info!(
            instances = summary.instances,
            fired = summary.fired,
            resolved = summary.resolved,
            skipped = summary.skipped,
            errors = summary.errors,
            "evaluation tick"
        );
    }

    /// Run both tickers until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            evaluate_interval_secs = self.config.evaluate_interval_secs,
            "scheduler starting"
        );

        let poll_task = {
            let scheduler = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker =
                    interval(Duration::from_secs(scheduler.config.poll_interval_secs));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let scheduler = Arc::clone(&scheduler);
                            let tick = tokio::spawn(async move { scheduler.tick_poll().await });
                            if let Err(e) = tick.await {
                                error!(error = %e, "poll tick panicked; ticker continues");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let evaluate_task = {
            let scheduler = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut ticker =
                    interval(Duration::from_secs(scheduler.config.evaluate_interval_secs));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let scheduler = Arc::clone(&scheduler);
                            let tick = tokio::spawn(async move { scheduler.tick_evaluate().await });
                            if let Err(e) = tick.await {
                                error!(error = %e, "evaluation tick panicked; ticker continues");
                            }
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        // Wait for the shutdown signal, then for both tickers to drain
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        let _ = poll_task.await;
        let _ = evaluate_task.await;
        info!("scheduler stopped");
    }
}
