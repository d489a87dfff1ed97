//! Rule: token usage spike.
//!
//! Compares the token rate over a short recent window against the rate over
//! the trailing baseline window immediately before it. A runaway bot shows
//! up as a recent rate a configurable multiple above baseline. With no
//! baseline data the rule skips rather than guessing: an instance's first
//! minutes of traffic are not a spike.

use chrono::Duration;
use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;
use crate::model::CostEvent;

pub struct TokenSpike;

fn tokens_per_minute(events: &[&CostEvent], window_mins: i64) -> f64 {
    if window_mins <= 0 {
        return 0.0;
    }
    let total: i64 = events.iter().map(|e| e.total_tokens()).sum();
    total as f64 / window_mins as f64
}

impl RuleEvaluator for TokenSpike {
    fn rule(&self) -> AlertRule {
        AlertRule::TokenSpike
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        let recent_start = ctx.now - Duration::minutes(ctx.rules.spike_recent_mins);
        let baseline_start = recent_start - Duration::minutes(ctx.rules.spike_baseline_mins);

        let recent: Vec<&CostEvent> = ctx
            .cost_events
            .iter()
            .filter(|e| e.occurred_at >= recent_start)
            .collect();
        if recent.is_empty() {
            return Ok(Verdict::Resolve);
        }

        let baseline: Vec<&CostEvent> = ctx
            .cost_events
            .iter()
            .filter(|e| e.occurred_at >= baseline_start && e.occurred_at < recent_start)
            .collect();
        if baseline.is_empty() {
            // No history to compare against
            return Ok(Verdict::Skip);
        }

        let recent_rate = tokens_per_minute(&recent, ctx.rules.spike_recent_mins);
        let baseline_rate = tokens_per_minute(&baseline, ctx.rules.spike_baseline_mins);

        let spiking = recent.len() >= ctx.rules.spike_min_events
            && recent_rate > ctx.rules.spike_multiplier * baseline_rate;
        if !spiking {
            return Ok(Verdict::Resolve);
        }

        let draft = AlertDraft::new(
            AlertRule::TokenSpike,
            ctx.instance.id,
            ctx.instance.fleet_id,
            AlertSeverity::Warning,
            format!(
                "Instance '{}' token rate is {:.0} tok/min, {:.1}x the trailing baseline of {:.0} tok/min",
                ctx.instance.name,
                recent_rate,
                if baseline_rate > 0.0 { recent_rate / baseline_rate } else { f64::INFINITY },
                baseline_rate
            ),
        )
        .with_detail(json!({
            "recent_rate_per_min": recent_rate,
            "baseline_rate_per_min": baseline_rate,
            "recent_events": recent.len(),
            "multiplier": ctx.rules.spike_multiplier,
        }))
        .with_remediation(RemediationAction::ReviewCosts);

        Ok(Verdict::Fire(draft))
    }
}
