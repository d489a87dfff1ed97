//! Rule: config drift.
//!
//! The instance record carries the desired config hash; the connection
//! carries the hash the remote agent last reported as applied. Both must be
//! known before drift can be claimed - a missing hash on either side is not
//! drift.

use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;

pub struct ConfigDrift;

impl RuleEvaluator for ConfigDrift {
    fn rule(&self) -> AlertRule {
        AlertRule::ConfigDrift
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        let desired = ctx.instance.config_hash.as_deref();
        let applied = ctx
            .connection
            .as_ref()
            .and_then(|c| c.config_hash.as_deref());

        match (desired, applied) {
            (Some(desired), Some(applied)) if desired != applied => {
                let draft = AlertDraft::new(
                    AlertRule::ConfigDrift,
                    ctx.instance.id,
                    ctx.instance.fleet_id,
                    AlertSeverity::Error,
                    format!(
                        "Instance '{}' is running config {applied} but {desired} is desired",
                        ctx.instance.name
                    ),
                )
                .with_detail(json!({
                    "desired_hash": desired,
                    "applied_hash": applied,
                }))
                .with_remediation(RemediationAction::Reconcile);
                Ok(Verdict::Fire(draft))
            }
            _ => Ok(Verdict::Resolve),
        }
    }
}
