//! Configuration for the control loop.
//!
//! Loaded from a JSON config file with every field defaulted, so an empty
//! `{}` is a valid config. Rule thresholds default to the values the alert
//! battery was tuned with in production.

use serde::{Deserialize, Serialize};

use crate::alerts::types::AlertRule;
use crate::error::WatchError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Interval of the health-poll ticker, seconds
    pub poll_interval_secs: u64,
    /// Interval of the alert-evaluate ticker, seconds
    pub evaluate_interval_secs: u64,
    /// Per-instance agent call timeout, milliseconds
    pub call_timeout_ms: u64,
    /// Concurrency ceiling for in-flight agent connections during one poll tick
    pub max_in_flight: usize,
    pub rules: RuleConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            evaluate_interval_secs: 60,
            call_timeout_ms: 10_000,
            max_in_flight: 10,
            rules: RuleConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self, WatchError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| WatchError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }
}

/// Thresholds and toggles for the alert rule battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Rules excluded from evaluation entirely
    pub disabled_rules: Vec<AlertRule>,
    /// Minutes without a heartbeat before a bad connection counts as unreachable
    pub unreachable_after_mins: i64,
    /// Minutes an instance must stay degraded before alerting
    pub degraded_after_mins: i64,
    /// Consecutive poll failures before `health_check_failed` fires
    pub error_count_threshold: u32,
    /// Token-spike recent window, minutes
    pub spike_recent_mins: i64,
    /// Token-spike baseline window, minutes (immediately preceding the recent window)
    pub spike_baseline_mins: i64,
    /// Recent rate must exceed baseline rate by this factor
    pub spike_multiplier: f64,
    /// Minimum events inside the recent window before a spike can fire
    pub spike_min_events: usize,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            disabled_rules: Vec::new(),
            unreachable_after_mins: 2,
            degraded_after_mins: 5,
            error_count_threshold: 3,
            spike_recent_mins: 5,
            spike_baseline_mins: 30,
            spike_multiplier: 2.0,
            spike_min_events: 2,
        }
    }
}

impl RuleConfig {
    #[must_use]
    pub fn is_enabled(&self, rule: AlertRule) -> bool {
        !self.disabled_rules.contains(&rule)
    }
}
