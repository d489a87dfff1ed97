//! Fleet control loop: health polling, alert evaluation and remediation.
//!
//! The loop runs two tickers. The fast one polls every RUNNING/DEGRADED
//! instance's agent over the wire protocol and persists health snapshots;
//! the slow one runs the alert rule battery over the recorded state,
//! keeping the deduplicated alert store in sync with reality and handing
//! fired alerts to the notifier. Remediation and diagnostics sit on top of
//! the same stores and the same agent connector.
//!
//! Component map:
//! - [`poller::HealthPoller`]: bounded-concurrency fan-out over the fleet
//! - [`alerts::AlertEngine`]: the stateful rule battery
//! - [`aggregate::HealthAggregator`]: fleet and workspace rollups
//! - [`remediate::RemediationDispatcher`]: executes alert-carried actions
//! - [`doctor::Doctor`]: per-instance diagnostics
//! - [`scheduler::Scheduler`]: the two tickers

pub mod aggregate;
pub mod alerts;
pub mod config;
pub mod connector;
pub mod doctor;
pub mod error;
pub mod model;
pub mod poller;
pub mod remediate;
pub mod scheduler;
pub mod store;

pub use config::{RuleConfig, WatchConfig};
pub use error::WatchError;
