//! Rule: consecutive health-check failures.
//!
//! The poller increments the instance's error counter on every failed poll
//! and zeroes it on success, so the counter already encodes "consecutive".
//! This rule just compares it against the threshold.

use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;

pub struct HealthCheckFailed;

impl RuleEvaluator for HealthCheckFailed {
    fn rule(&self) -> AlertRule {
        AlertRule::HealthCheckFailed
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        if ctx.instance.error_count < ctx.rules.error_count_threshold {
            return Ok(Verdict::Resolve);
        }

        let draft = AlertDraft::new(
            AlertRule::HealthCheckFailed,
            ctx.instance.id,
            ctx.instance.fleet_id,
            AlertSeverity::Error,
            format!(
                "Instance '{}' failed {} consecutive health check(s)",
                ctx.instance.name, ctx.instance.error_count
            ),
        )
        .with_detail(json!({
            "error_count": ctx.instance.error_count,
            "threshold": ctx.rules.error_count_threshold,
            "last_error": ctx.instance.last_error,
        }))
        .with_remediation(RemediationAction::Restart);

        Ok(Verdict::Fire(draft))
    }
}
