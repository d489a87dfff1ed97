//! Rules: budget warning and budget critical.
//!
//! Both rules share one pass over the applicable budgets: month-to-date
//! spend is computed once, each active budget with a positive limit gets a
//! spend percentage, and the single worst breach decides which of the two
//! rules fires. The two are mutually exclusive per instance per tick; a
//! budget past the critical threshold fires `budget_critical` only, and the
//! warning rule resolves.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde_json::json;

use super::types::{AlertDraft, AlertRule, AlertSeverity, RemediationAction};
use super::{EvalContext, RuleEvaluator, Verdict};
use crate::error::WatchError;
use crate::model::BudgetConfig;

/// Midnight UTC on the first of `now`'s month.
#[must_use]
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(now, |naive| Utc.from_utc_datetime(&naive))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreachLevel {
    Warning,
    Critical,
}

#[derive(Debug)]
struct Breach<'a> {
    budget: &'a BudgetConfig,
    level: BreachLevel,
    spend_pct: f64,
    spend_cents: i64,
}

/// Month-to-date spend plus the single worst threshold breach, if any.
///
/// "Worst" prefers any critical breach over any warning breach, then the
/// highest spend percentage within that level.
fn worst_breach(ctx: &EvalContext) -> Option<Breach<'_>> {
    let start = month_start(ctx.now);
    let spend_cents: i64 = ctx
        .cost_events
        .iter()
        .filter(|e| e.occurred_at >= start)
        .map(|e| e.cost_cents)
        .sum();

    let mut worst: Option<Breach<'_>> = None;
    for budget in &ctx.budgets {
        if !budget.is_active || budget.monthly_limit_cents <= 0 {
            continue;
        }
        let spend_pct = spend_cents as f64 * 100.0 / budget.monthly_limit_cents as f64;
        let level = if spend_pct >= budget.critical_threshold_pct {
            BreachLevel::Critical
        } else if spend_pct >= budget.warn_threshold_pct {
            BreachLevel::Warning
        } else {
            continue;
        };
        let candidate = Breach {
            budget,
            level,
            spend_pct,
            spend_cents,
        };
        let replace = match &worst {
            None => true,
            Some(current) => match (level, current.level) {
                (BreachLevel::Critical, BreachLevel::Warning) => true,
                (BreachLevel::Warning, BreachLevel::Critical) => false,
                _ => spend_pct > current.spend_pct,
            },
        };
        if replace {
            worst = Some(candidate);
        }
    }
    worst
}

fn breach_draft(ctx: &EvalContext, breach: &Breach<'_>) -> AlertDraft {
    let (rule, severity, threshold_pct) = match breach.level {
        BreachLevel::Warning => (
            AlertRule::BudgetWarning,
            AlertSeverity::Warning,
            breach.budget.warn_threshold_pct,
        ),
        BreachLevel::Critical => (
            AlertRule::BudgetCritical,
            AlertSeverity::Critical,
            breach.budget.critical_threshold_pct,
        ),
    };
    let scope = if breach.budget.instance_id.is_some() {
        "instance"
    } else {
        "fleet"
    };

    AlertDraft::new(
        rule,
        ctx.instance.id,
        ctx.instance.fleet_id,
        severity,
        format!(
            "Instance '{}' is at {:.1}% of its {scope} budget (${:.2} of ${:.2})",
            ctx.instance.name,
            breach.spend_pct,
            breach.spend_cents as f64 / 100.0,
            breach.budget.monthly_limit_cents as f64 / 100.0,
        ),
    )
    .with_detail(json!({
        "budget_id": breach.budget.id,
        "budget_scope": scope,
        "spend_cents": breach.spend_cents,
        "limit_cents": breach.budget.monthly_limit_cents,
        "spend_pct": breach.spend_pct,
        "threshold_pct": threshold_pct,
    }))
    .with_remediation(RemediationAction::ReviewCosts)
}

pub struct BudgetWarning;

impl RuleEvaluator for BudgetWarning {
    fn rule(&self) -> AlertRule {
        AlertRule::BudgetWarning
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        match worst_breach(ctx) {
            Some(breach) if breach.level == BreachLevel::Warning => {
                Ok(Verdict::Fire(breach_draft(ctx, &breach)))
            }
            _ => Ok(Verdict::Resolve),
        }
    }
}

pub struct BudgetCritical;

impl RuleEvaluator for BudgetCritical {
    fn rule(&self) -> AlertRule {
        AlertRule::BudgetCritical
    }

    fn evaluate(&self, ctx: &EvalContext) -> Result<Verdict, WatchError> {
        match worst_breach(ctx) {
            Some(breach) if breach.level == BreachLevel::Critical => {
                Ok(Verdict::Fire(breach_draft(ctx, &breach)))
            }
            _ => Ok(Verdict::Resolve),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::test_support::{context, running_instance};
    use crate::model::CostEvent;
    use chrono::Duration;

    fn spend(ctx: &mut EvalContext, cost_cents: i64) {
        ctx.cost_events.push(CostEvent::new(
            ctx.instance.id,
            100,
            100,
            cost_cents,
            ctx.now - Duration::minutes(1),
        ));
    }

    #[test]
    fn test_month_start_is_first_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 8, 17, 14, 30, 0).unwrap();
        let start = month_start(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_under_warning_threshold_both_resolve() {
        let instance = running_instance();
        let id = instance.id;
        let mut ctx = context(instance);
        ctx.budgets = vec![BudgetConfig::for_instance(id, 10_000)];
        spend(&mut ctx, 5_000); // 50%

        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Resolve));
        assert!(matches!(BudgetCritical.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }

    #[test]
    fn test_warning_breach_fires_warning_only() {
        let instance = running_instance();
        let id = instance.id;
        let mut ctx = context(instance);
        ctx.budgets = vec![BudgetConfig::for_instance(id, 10_000)];
        spend(&mut ctx, 8_000); // 80%, past warn 75, under critical 90

        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Fire(_)));
        assert!(matches!(BudgetCritical.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }

    #[test]
    fn test_critical_breach_fires_critical_and_resolves_warning() {
        let instance = running_instance();
        let id = instance.id;
        let mut ctx = context(instance);
        ctx.budgets = vec![BudgetConfig::for_instance(id, 10_000)];
        spend(&mut ctx, 9_500); // 95%

        let Verdict::Fire(draft) = BudgetCritical.evaluate(&ctx).unwrap() else {
            panic!("expected critical fire");
        };
        assert_eq!(draft.severity, AlertSeverity::Critical);
        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }

    #[test]
    fn test_worst_breach_wins_across_budgets() {
        // Instance budget at 95% (critical), fleet budget at 60% (clear):
        // only the critical rule fires.
        let instance = running_instance();
        let id = instance.id;
        let fleet_id = instance.fleet_id;
        let mut ctx = context(instance);
        ctx.budgets = vec![
            BudgetConfig::for_instance(id, 10_000),
            BudgetConfig::for_fleet(fleet_id, 16_000),
        ];
        spend(&mut ctx, 9_500); // 95% of instance budget, ~59% of fleet budget

        assert!(matches!(BudgetCritical.evaluate(&ctx).unwrap(), Verdict::Fire(_)));
        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }

    #[test]
    fn test_inactive_budget_is_ignored() {
        let instance = running_instance();
        let id = instance.id;
        let mut ctx = context(instance);
        let mut budget = BudgetConfig::for_instance(id, 10_000);
        budget.is_active = false;
        ctx.budgets = vec![budget];
        spend(&mut ctx, 9_900);

        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Resolve));
        assert!(matches!(BudgetCritical.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }

    #[test]
    fn test_zero_limit_budget_is_ignored() {
        let instance = running_instance();
        let id = instance.id;
        let mut ctx = context(instance);
        ctx.budgets = vec![BudgetConfig::for_instance(id, 0)];
        spend(&mut ctx, 100);

        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Resolve));
        assert!(matches!(BudgetCritical.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }

    #[test]
    fn test_spend_outside_current_month_excluded() {
        let instance = running_instance();
        let id = instance.id;
        let mut ctx = context(instance);
        ctx.budgets = vec![BudgetConfig::for_instance(id, 10_000)];
        ctx.cost_events.push(CostEvent::new(
            id,
            100,
            100,
            9_900,
            month_start(ctx.now) - Duration::hours(1),
        ));

        assert!(matches!(BudgetWarning.evaluate(&ctx).unwrap(), Verdict::Resolve));
        assert!(matches!(BudgetCritical.evaluate(&ctx).unwrap(), Verdict::Resolve));
    }
}
