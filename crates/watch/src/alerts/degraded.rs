//! Rule: instance stuck in degraded health.
//!
//! Degraded is a transient state while channels settle; only sustained
//! degradation past the threshold pages anyone, and the remediation is a
//! doctor run rather than a restart.

use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;
use crate::model::HealthState;

pub struct DegradedInstance;

impl RuleEvaluator for DegradedInstance {
    fn rule(&self) -> AlertRule {
        AlertRule::DegradedInstance
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        if ctx.instance.health != HealthState::Degraded {
            return Ok(Verdict::Resolve);
        }

        let Some(since) = ctx.instance.last_health_check_at else {
            // Degraded but never checked: no duration to measure yet
            return Ok(Verdict::Resolve);
        };

        let degraded_mins = (ctx.now - since).num_minutes();
        if degraded_mins < ctx.rules.degraded_after_mins {
            return Ok(Verdict::Resolve);
        }

        let draft = AlertDraft::new(
            AlertRule::DegradedInstance,
            ctx.instance.id,
            ctx.instance.fleet_id,
            AlertSeverity::Warning,
            format!(
                "Instance '{}' has been degraded for {} minute(s)",
                ctx.instance.name, degraded_mins
            ),
        )
        .with_detail(json!({
            "degraded_mins": degraded_mins,
            "threshold_mins": ctx.rules.degraded_after_mins,
        }))
        .with_remediation(RemediationAction::RunDoctor);

        Ok(Verdict::Fire(draft))
    }
}
