//! Rule: expired or broken channel pairings.
//!
//! An instance can be perfectly healthy at the machine level while all of
//! its chat channels are silently dead because a pairing lapsed. Any
//! session in EXPIRED or ERROR fires; the alert lists the affected channel
//! types so the operator knows what to re-pair.

use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;
use crate::model::ChannelAuthState;

pub struct ChannelAuthExpired;

impl RuleEvaluator for ChannelAuthExpired {
    fn rule(&self) -> AlertRule {
        AlertRule::ChannelAuthExpired
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        let broken: Vec<_> = ctx
            .auth_sessions
            .iter()
            .filter(|s| matches!(s.state, ChannelAuthState::Expired | ChannelAuthState::Error))
            .collect();

        if broken.is_empty() {
            return Ok(Verdict::Resolve);
        }

        let channel_types: Vec<&str> = broken.iter().map(|s| s.channel_type.as_str()).collect();
        let draft = AlertDraft::new(
            AlertRule::ChannelAuthExpired,
            ctx.instance.id,
            ctx.instance.fleet_id,
            AlertSeverity::Error,
            format!(
                "Instance '{}' has {} channel pairing(s) needing re-auth: {}",
                ctx.instance.name,
                broken.len(),
                channel_types.join(", ")
            ),
        )
        .with_detail(json!({
            "channels": broken
                .iter()
                .map(|s| json!({
                    "channel_type": s.channel_type,
                    "state": s.state,
                    "last_error": s.last_error,
                }))
                .collect::<Vec<_>>(),
        }))
        .with_remediation(RemediationAction::RePairChannel);

        Ok(Verdict::Fire(draft))
    }
}
