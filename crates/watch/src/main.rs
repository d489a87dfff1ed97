//! `fleetwatch`: the fleet health control loop binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use tokio::sync::watch as watch_channel;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use notify::Notifier;
use watch::aggregate::HealthAggregator;
use watch::alerts::{AlertEngine, AlertFilter, AlertStore, MemoryAlertStore};
use watch::connector::HttpAgentConnector;
use watch::doctor::Doctor;
use watch::model::{BudgetConfig, ChannelAuthSession, Connection, CostEvent, Fleet, Instance};
use watch::poller::{HealthPoller, PollerConfig};
use watch::remediate::{InstanceReconciler, RemediationDispatcher};
use watch::scheduler::{Scheduler, SchedulerConfig};
use watch::store::{
    BudgetStore, ChannelAuthStore, ConnectionStore, CostEventStore, FleetStore, InstanceStore,
    MemoryBudgetStore, MemoryChannelAuthStore, MemoryConnectionStore, MemoryCostEventStore,
    MemoryFleetStore, MemoryInstanceStore, MemorySnapshotStore, SnapshotStore,
};
use watch::WatchConfig;

#[derive(Parser)]
#[command(name = "fleetwatch", version, about = "Fleet health monitoring and remediation loop")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true, env = "FLEETWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a JSON seed file with fleets, instances and connections
    #[arg(long, global = true, env = "FLEETWATCH_SEED")]
    seed: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both tickers until interrupted
    Run,
    /// Run a single poll tick and exit
    Poll,
    /// Run a single evaluation tick and exit
    Evaluate,
    /// Print the workspace health rollup
    Health,
    /// Diagnose one instance
    Doctor {
        /// Instance id
        instance: Uuid,
    },
    /// Execute the remediation carried by an alert
    Remediate {
        /// Alert id
        alert: Uuid,
    },
    /// List alerts
    Alerts,
}

/// Seed data for the in-memory stores.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    fleets: Vec<Fleet>,
    instances: Vec<Instance>,
    connections: Vec<Connection>,
    budgets: Vec<BudgetConfig>,
    channel_auth: Vec<ChannelAuthSession>,
    cost_events: Vec<CostEvent>,
}

struct App {
    poller: Arc<HealthPoller>,
    engine: Arc<AlertEngine>,
    aggregator: HealthAggregator,
    doctor: Doctor,
    dispatcher: RemediationDispatcher,
    alerts: Arc<MemoryAlertStore>,
    config: WatchConfig,
}

impl App {
    async fn build(config: WatchConfig, seed: Option<SeedFile>) -> Self {
        let instances: Arc<dyn InstanceStore> = Arc::new(MemoryInstanceStore::new());
        let connections: Arc<dyn ConnectionStore> = Arc::new(MemoryConnectionStore::new());
        let snapshots: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
        let auth_sessions: Arc<dyn ChannelAuthStore> = Arc::new(MemoryChannelAuthStore::new());
        let budgets: Arc<dyn BudgetStore> = Arc::new(MemoryBudgetStore::new());
        let cost_events: Arc<dyn CostEventStore> = Arc::new(MemoryCostEventStore::new());
        let fleets: Arc<dyn FleetStore> = Arc::new(MemoryFleetStore::new());
        let alerts = Arc::new(MemoryAlertStore::new());

        if let Some(seed) = seed {
            for fleet in seed.fleets {
                fleets.upsert(fleet).await;
            }
            for instance in seed.instances {
                instances.upsert(instance).await;
            }
            for connection in seed.connections {
                connections.upsert(connection).await;
            }
            for budget in seed.budgets {
                budgets.upsert(budget).await;
            }
            for session in seed.channel_auth {
                auth_sessions.upsert(session).await;
            }
            for event in seed.cost_events {
                cost_events.insert(event).await;
            }
        }

        let poller = Arc::new(HealthPoller::new(
            instances.clone(),
            connections.clone(),
            snapshots.clone(),
            Arc::new(HttpAgentConnector),
            PollerConfig {
                call_timeout_ms: config.call_timeout_ms,
                max_in_flight: config.max_in_flight,
            },
        ));

        let engine = Arc::new(AlertEngine::new(
            instances.clone(),
            connections.clone(),
            auth_sessions.clone(),
            budgets,
            cost_events,
            alerts.clone(),
            Arc::new(Notifier::from_env()),
            config.rules.clone(),
        ));

        let aggregator = HealthAggregator::new(
            fleets,
            instances.clone(),
            connections.clone(),
            snapshots.clone(),
        );

        let doctor = Doctor::new(
            instances.clone(),
            connections,
            snapshots,
            auth_sessions.clone(),
            poller.clone(),
        );

        let dispatcher = RemediationDispatcher::new(
            alerts.clone(),
            auth_sessions,
            poller.clone(),
            Arc::new(InstanceReconciler::new(instances)),
        );

        Self {
            poller,
            engine,
            aggregator,
            doctor,
            dispatcher,
            alerts,
            config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => WatchConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => WatchConfig::default(),
    };

    let seed = match &cli.seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read seed file {}", path.display()))?;
            let seed: SeedFile = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse seed file {}", path.display()))?;
            info!(
                fleets = seed.fleets.len(),
                instances = seed.instances.len(),
                "loaded seed data"
            );
            Some(seed)
        }
        None => None,
    };

    let app = App::build(config, seed).await;

    match cli.command {
        Commands::Run => run_loop(&app).await?,
        Commands::Poll => {
            let summary = app.poller.poll_all().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Evaluate => {
            let summary = app.engine.evaluate_all().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Health => {
            let view = app.aggregator.workspace_health().await;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Doctor { instance } => {
            let report = app.doctor.diagnose(instance).await?;
            print_doctor(&report);
            if !report.healthy() {
                std::process::exit(1);
            }
        }
        Commands::Remediate { alert } => {
            let outcome = app.dispatcher.execute(alert).await?;
            let tag = if outcome.success {
                "OK".green()
            } else {
                "FAILED".red()
            };
            println!("{tag} {}", outcome.message);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Alerts => {
            let page = app.alerts.list(&AlertFilter::default()).await;
            println!(
                "{} alert(s), showing page {} (limit {})",
                page.total, page.page, page.limit
            );
            for alert in &page.data {
                let severity = match alert.severity {
                    watch::alerts::AlertSeverity::Critical => alert.severity.as_str().red().bold(),
                    watch::alerts::AlertSeverity::Error => alert.severity.as_str().red(),
                    watch::alerts::AlertSeverity::Warning => alert.severity.as_str().yellow(),
                    watch::alerts::AlertSeverity::Info => alert.severity.as_str().cyan(),
                };
                println!(
                    "[{severity}] {} {:?} hits={} {}",
                    alert.rule, alert.status, alert.consecutive_hits, alert.message
                );
            }
        }
    }

    Ok(())
}

async fn run_loop(app: &App) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(
        app.poller.clone(),
        app.engine.clone(),
        SchedulerConfig {
            poll_interval_secs: app.config.poll_interval_secs,
            evaluate_interval_secs: app.config.evaluate_interval_secs,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch_channel::channel(false);
    let runner = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    runner.await.context("scheduler task failed")?;
    Ok(())
}

fn print_doctor(report: &watch::doctor::DoctorReport) {
    let verdict = if report.healthy() {
        "HEALTHY".green().bold()
    } else {
        "UNHEALTHY".red().bold()
    };
    println!("{} {verdict}", report.instance_name.bold());
    println!(
        "  {} critical, {} error(s), {} warning(s)",
        report.criticals, report.errors, report.warnings
    );
    for finding in &report.findings {
        let severity = match finding.severity {
            watch::alerts::AlertSeverity::Critical => finding.severity.as_str().red().bold(),
            watch::alerts::AlertSeverity::Error => finding.severity.as_str().red(),
            watch::alerts::AlertSeverity::Warning => finding.severity.as_str().yellow(),
            watch::alerts::AlertSeverity::Info => finding.severity.as_str().cyan(),
        };
        print!("  [{severity}] {:?}: {}", finding.category, finding.message);
        if let Some(action) = finding.repair_action {
            print!(" (repair: {})", action.as_str());
        }
        println!();
    }
}
