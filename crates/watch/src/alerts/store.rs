//! Alert store: deduplicated, queryable alert records.
//!
//! The store enforces the composite-key invariant: at most one non-resolved
//! alert per `(rule, instance)` pair. Repeat breaches update the existing
//! record in place and bump `consecutive_hits`; an acknowledged or
//! suppressed alert that breaches again is re-activated, because an
//! operator's acknowledgment does not silence a recurring condition. A
//! resolved record is invisible to upsert, so history survives across a
//! resolve boundary as separate rows.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::types::{Alert, AlertDraft, AlertFilter, AlertPage, AlertRule, AlertStatus};
use crate::error::WatchError;

/// Contract the alert engine and remediation dispatcher consume.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Create or update the non-resolved alert for the draft's composite key.
    async fn upsert(&self, draft: AlertDraft) -> Alert;

    /// Resolve the ACTIVE/ACKNOWLEDGED alert for the key, if any.
    /// Resolving an absent or already-resolved alert is a safe no-op.
    async fn resolve_by_key(&self, rule: AlertRule, instance_id: Uuid) -> Option<Alert>;

    async fn get(&self, id: Uuid) -> Option<Alert>;

    async fn list(&self, filter: &AlertFilter) -> AlertPage;

    async fn acknowledge(&self, id: Uuid, by: Option<String>) -> Result<Alert, WatchError>;

    async fn active_count(&self) -> usize;

    /// Attach a remediation note and, when the remediation succeeded,
    /// resolve the alert.
    async fn record_remediation(
        &self,
        id: Uuid,
        note: String,
        resolve: bool,
    ) -> Result<Alert, WatchError>;
}

/// In-process alert store behind a single lock; upsert and resolve are
/// atomic per composite key because every mutation holds the write lock.
#[derive(Debug, Clone, Default)]
pub struct MemoryAlertStore {
    records: Arc<RwLock<Vec<Alert>>>,
}

impl MemoryAlertStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn upsert(&self, draft: AlertDraft) -> Alert {
        let now = Utc::now();
        let mut records = self.records.write().expect("alert store lock poisoned");

        let existing = records.iter_mut().find(|a| {
            a.rule == draft.rule
                && a.instance_id == Some(draft.instance_id)
                && a.status != AlertStatus::Resolved
        });

        if let Some(alert) = existing {
            alert.severity = draft.severity;
            alert.title = draft.title;
            alert.message = draft.message;
            alert.detail = draft.detail;
            alert.remediation_action = draft.remediation_action;
            alert.last_triggered_at = now;
            alert.consecutive_hits += 1;
            if matches!(
                alert.status,
                AlertStatus::Acknowledged | AlertStatus::Suppressed
            ) {
                alert.status = AlertStatus::Active;
                alert.acknowledged_at = None;
                alert.acknowledged_by = None;
            }
            return alert.clone();
        }

        let alert = Alert {
            id: Uuid::new_v4(),
            rule: draft.rule,
            instance_id: Some(draft.instance_id),
            fleet_id: Some(draft.fleet_id),
            severity: draft.severity,
            status: AlertStatus::Active,
            title: draft.title,
            message: draft.message,
            detail: draft.detail,
            remediation_action: draft.remediation_action,
            remediation_note: None,
            first_triggered_at: now,
            last_triggered_at: now,
            consecutive_hits: 1,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        };
        records.push(alert.clone());
        alert
    }

    async fn resolve_by_key(&self, rule: AlertRule, instance_id: Uuid) -> Option<Alert> {
        let mut records = self.records.write().expect("alert store lock poisoned");
        let alert = records.iter_mut().find(|a| {
            a.rule == rule
                && a.instance_id == Some(instance_id)
                && matches!(a.status, AlertStatus::Active | AlertStatus::Acknowledged)
        })?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());
        Some(alert.clone())
    }

    async fn get(&self, id: Uuid) -> Option<Alert> {
        self.records
            .read()
            .ok()
            .and_then(|r| r.iter().find(|a| a.id == id).cloned())
    }

    async fn list(&self, filter: &AlertFilter) -> AlertPage {
        let records = self.records.read().expect("alert store lock poisoned");
        let mut matching: Vec<Alert> = records
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_triggered_at.cmp(&a.last_triggered_at));

        let total = matching.len();
        let page = filter.page.max(1);
        let limit = filter.limit.max(1);
        let data = matching
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();

        AlertPage {
            data,
            total,
            page,
            limit,
        }
    }

    async fn acknowledge(&self, id: Uuid, by: Option<String>) -> Result<Alert, WatchError> {
        let mut records = self.records.write().expect("alert store lock poisoned");
        let alert = records
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(WatchError::AlertNotFound(id))?;
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = by;
        Ok(alert.clone())
    }

    async fn active_count(&self) -> usize {
        self.records
            .read()
            .map(|r| {
                r.iter()
                    .filter(|a| a.status == AlertStatus::Active)
                    .count()
            })
            .unwrap_or(0)
    }

    async fn record_remediation(
        &self,
        id: Uuid,
        note: String,
        resolve: bool,
    ) -> Result<Alert, WatchError> {
        let mut records = self.records.write().expect("alert store lock poisoned");
        let alert = records
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(WatchError::AlertNotFound(id))?;
        alert.remediation_note = Some(note);
        if resolve && matches!(alert.status, AlertStatus::Active | AlertStatus::Acknowledged) {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
        }
        Ok(alert.clone())
    }
}
