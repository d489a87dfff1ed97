//! Rule: instance unreachable.
//!
//! Fires when no connection is registered at all, or when the connection is
//! in ERROR/DISCONNECTED and the last heartbeat is older than the
//! configured window. The window is the hysteresis: a momentary disconnect
//! between two polls does not page anyone. With no connection there is no
//! heartbeat to age, so that case fires without the window; the alert
//! detail records that the window was not applied.

use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;
use crate::model::ConnectionStatus;

pub struct UnreachableInstance;

impl RuleEvaluator for UnreachableInstance {
    fn rule(&self) -> AlertRule {
        AlertRule::UnreachableInstance
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        let threshold_mins = ctx.rules.unreachable_after_mins;

        let Some(connection) = &ctx.connection else {
            let draft = AlertDraft::new(
                AlertRule::UnreachableInstance,
                ctx.instance.id,
                ctx.instance.fleet_id,
                AlertSeverity::Critical,
                format!("No connection is registered for instance '{}'", ctx.instance.name),
            )
            .with_detail(json!({
                "connection": "missing",
                "heartbeat_window_mins": threshold_mins,
                "heartbeat_window_applied": false,
            }))
            .with_remediation(RemediationAction::Restart);
            return Ok(Verdict::Fire(draft));
        };

        if !matches!(
            connection.status,
            ConnectionStatus::Error | ConnectionStatus::Disconnected
        ) {
            return Ok(Verdict::Resolve);
        }

        let stale_mins = match connection.last_heartbeat {
            Some(heartbeat) => (ctx.now - heartbeat).num_minutes(),
            // A dead connection that never produced a heartbeat is as stale
            // as it gets
            None => i64::MAX,
        };

        if stale_mins < threshold_mins {
            return Ok(Verdict::Resolve);
        }

        let draft = AlertDraft::new(
            AlertRule::UnreachableInstance,
            ctx.instance.id,
            ctx.instance.fleet_id,
            AlertSeverity::Critical,
            format!(
                "Instance '{}' is unreachable: connection {:?}, no heartbeat for {} minute(s)",
                ctx.instance.name,
                connection.status,
                if stale_mins == i64::MAX { -1 } else { stale_mins }
            ),
        )
        .with_detail(json!({
            "connection_status": connection.status,
            "minutes_since_heartbeat": if stale_mins == i64::MAX { None } else { Some(stale_mins) },
            "threshold_mins": threshold_mins,
        }))
        .with_remediation(RemediationAction::Restart);

        Ok(Verdict::Fire(draft))
    }
}
