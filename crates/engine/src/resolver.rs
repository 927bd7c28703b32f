//! Conflict detection and resolution for prospective writes.
//!
//! Detection reads the current work-item state and emits every
//! precondition that makes a naive write unsafe; resolution applies a
//! [`ConflictStrategy`] and records the attempt in a bounded in-memory
//! log. Detection never fails a run: a fetch error produces a report
//! that cannot proceed.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use tb_clients::work_items::WorkItemStore;
use tb_domain::conflict::{
    Conflict, ConflictKind, ConflictLogEntry, ConflictReport, ConflictSeverity, ConflictStrategy,
    Resolution, ResolutionAction,
};

/// Proposed/estimate ratio beyond which a write is flagged overbudget.
pub const OVERBUDGET_RATIO: f64 = 2.5;

/// Most recent resolution-log entries kept in memory.
const CONFLICT_LOG_CAP: usize = 100;

/// Tolerance for "same hours" comparisons.
const HOURS_EPSILON: f64 = 1e-9;

/// Outcome of resolving a batch of reports.
#[derive(Debug, Clone, Default)]
pub struct BatchResolution {
    pub total: usize,
    pub resolved: usize,
    pub failed: usize,
    pub blocked: usize,
    pub items: Vec<Resolution>,
}

/// Summary statistics over the conflict log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConflictLogSummary {
    pub total: usize,
    pub resolved: usize,
    pub failed: usize,
    pub strategies_used: BTreeMap<String, usize>,
}

/// Detects and resolves conflicts against the work-item store.
pub struct ConflictResolver {
    store: Arc<dyn WorkItemStore>,
    default_strategy: ConflictStrategy,
    log: Mutex<VecDeque<ConflictLogEntry>>,
}

impl ConflictResolver {
    pub fn new(store: Arc<dyn WorkItemStore>, default_strategy: ConflictStrategy) -> Self {
        tracing::info!(strategy = default_strategy.as_str(), "conflict resolver ready");
        Self {
            store,
            default_strategy,
            log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default_strategy
    }

    // ── Detection ────────────────────────────────────────────────────

    /// Detect conflicts before updating a work item.
    ///
    /// Never returns an error: a failed fetch marks the report as unable
    /// to proceed and records the message.
    pub async fn detect(
        &self,
        work_item_id: i64,
        proposed_hours: f64,
        last_known_hours: Option<f64>,
    ) -> ConflictReport {
        tracing::debug!(work_item_id, proposed_hours, "checking conflicts");

        let mut report = ConflictReport {
            work_item_id,
            conflicts: Vec::new(),
            current_hours: None,
            proposed_hours,
            last_known_hours,
            can_proceed: true,
            error: None,
        };

        let item = match self.store.get_work_item(work_item_id, None).await {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(work_item_id, error = %e, "conflict detection fetch failed");
                report.error = Some(e.to_string());
                report.can_proceed = false;
                return report;
            }
        };

        let current = item.scheduling.completed_work;
        report.current_hours = Some(current);

        match last_known_hours {
            Some(last_known) if (current - last_known).abs() > HOURS_EPSILON => {
                report.conflicts.push(
                    Conflict::new(
                        ConflictKind::ManualUpdate,
                        ConflictSeverity::High,
                        format!(
                            "Manual update detected: value changed from {last_known}h to {current}h"
                        ),
                    )
                    .with_current(current)
                    .with_expected(last_known),
                );
                tracing::warn!(work_item_id, "manual update detected");
            }
            None if current > 0.0 => {
                report.conflicts.push(
                    Conflict::new(
                        ConflictKind::ValueMismatch,
                        ConflictSeverity::Medium,
                        format!("Work item already has {current}h completed work"),
                    )
                    .with_current(current),
                );
            }
            _ => {}
        }

        let estimate = item.scheduling.original_estimate;
        if estimate > 0.0 {
            let ratio = proposed_hours / estimate;
            if ratio > OVERBUDGET_RATIO {
                report.conflicts.push(
                    Conflict::new(
                        ConflictKind::Overbudget,
                        ConflictSeverity::High,
                        format!(
                            "Proposed hours ({proposed_hours}h) is {ratio:.1}x the estimate ({estimate}h)"
                        ),
                    )
                    .with_proposed(proposed_hours)
                    .with_estimate(estimate)
                    .with_ratio(ratio),
                );
            }
        }

        if item.is_locked() {
            report.conflicts.push(
                Conflict::new(
                    ConflictKind::WorkItemLocked,
                    ConflictSeverity::Critical,
                    format!("Work item is in '{}' state", item.state),
                )
                .with_state(&item.state),
            );
            report.can_proceed = false;
        }

        match self.store.validate_permissions(work_item_id).await {
            Ok(true) => {}
            Ok(false) => {
                report.conflicts.push(Conflict::new(
                    ConflictKind::PermissionDenied,
                    ConflictSeverity::Critical,
                    "Insufficient permissions to update work item".to_string(),
                ));
                report.can_proceed = false;
            }
            Err(e) => {
                tracing::warn!(work_item_id, error = %e, "permission check failed");
                report.error = Some(e.to_string());
                report.can_proceed = false;
            }
        }

        report
    }

    // ── Resolution ───────────────────────────────────────────────────

    /// Resolve one report with the given strategy (default when `None`).
    pub fn resolve(
        &self,
        report: &ConflictReport,
        strategy: Option<ConflictStrategy>,
    ) -> Resolution {
        let strategy = strategy.unwrap_or(self.default_strategy);
        let kinds: Vec<ConflictKind> = report.conflicts.iter().map(|c| c.kind).collect();

        let resolution = if !report.has_conflicts() && report.can_proceed {
            Resolution {
                work_item_id: report.work_item_id,
                strategy,
                resolved: true,
                action_taken: ResolutionAction::NoConflicts,
                final_value: Some(report.proposed_hours),
                message: "no conflicts detected".into(),
                conflicts_resolved: Vec::new(),
            }
        } else if !report.can_proceed {
            Resolution {
                work_item_id: report.work_item_id,
                strategy,
                resolved: false,
                action_taken: ResolutionAction::Blocked,
                final_value: None,
                message: "cannot proceed due to critical conflicts".into(),
                conflicts_resolved: Vec::new(),
            }
        } else {
            let current = report.current_hours.unwrap_or(0.0);
            let proposed = report.proposed_hours;
            match strategy {
                ConflictStrategy::Override => Resolution {
                    work_item_id: report.work_item_id,
                    strategy,
                    resolved: true,
                    action_taken: ResolutionAction::Override,
                    final_value: Some(proposed),
                    message: format!("overriding {current}h with {proposed}h"),
                    conflicts_resolved: kinds.clone(),
                },
                ConflictStrategy::Add => Resolution {
                    work_item_id: report.work_item_id,
                    strategy,
                    resolved: true,
                    action_taken: ResolutionAction::Add,
                    final_value: Some(current + proposed),
                    message: format!(
                        "adding {proposed}h to existing {current}h = {}h",
                        current + proposed
                    ),
                    conflicts_resolved: kinds.clone(),
                },
                ConflictStrategy::Skip => Resolution {
                    work_item_id: report.work_item_id,
                    strategy,
                    resolved: true,
                    action_taken: ResolutionAction::Skip,
                    final_value: Some(current),
                    message: format!("keeping existing value {current}h, skipping update"),
                    conflicts_resolved: kinds.clone(),
                },
                ConflictStrategy::Fail => Resolution {
                    work_item_id: report.work_item_id,
                    strategy,
                    resolved: false,
                    action_taken: ResolutionAction::Fail,
                    final_value: None,
                    message: "failing due to conflict".into(),
                    conflicts_resolved: Vec::new(),
                },
            }
        };

        tracing::info!(
            work_item_id = report.work_item_id,
            strategy = strategy.as_str(),
            action = ?resolution.action_taken,
            resolved = resolution.resolved,
            "conflict resolution"
        );

        self.log_resolution(report, &resolution, kinds);
        resolution
    }

    /// Resolve many reports; log entries appear in input order.
    pub fn resolve_batch(
        &self,
        reports: &[ConflictReport],
        strategy: Option<ConflictStrategy>,
    ) -> BatchResolution {
        let mut outcome = BatchResolution {
            total: reports.len(),
            ..Default::default()
        };

        for report in reports {
            let resolution = self.resolve(report, strategy);
            if resolution.resolved {
                outcome.resolved += 1;
            } else if resolution.action_taken == ResolutionAction::Blocked {
                outcome.blocked += 1;
            } else {
                outcome.failed += 1;
            }
            outcome.items.push(resolution);
        }

        tracing::info!(
            total = outcome.total,
            resolved = outcome.resolved,
            failed = outcome.failed,
            blocked = outcome.blocked,
            "batch resolution complete"
        );
        outcome
    }

    /// Strategy recommendation based on what was detected.
    pub fn recommended_strategy(&self, report: &ConflictReport) -> ConflictStrategy {
        if !report.can_proceed {
            return ConflictStrategy::Fail;
        }
        if !report.has_conflicts() {
            return ConflictStrategy::Override;
        }
        if report.has_kind(ConflictKind::ManualUpdate) || report.has_kind(ConflictKind::Overbudget)
        {
            return ConflictStrategy::Skip;
        }
        if report.only_kind(ConflictKind::ValueMismatch) {
            let current = report.current_hours.unwrap_or(0.0);
            return if report.proposed_hours > current {
                ConflictStrategy::Override
            } else {
                ConflictStrategy::Add
            };
        }
        ConflictStrategy::Skip
    }

    // ── Log ──────────────────────────────────────────────────────────

    fn log_resolution(
        &self,
        report: &ConflictReport,
        resolution: &Resolution,
        kinds: Vec<ConflictKind>,
    ) {
        let mut log = self.log.lock();
        if log.len() == CONFLICT_LOG_CAP {
            log.pop_front();
        }
        log.push_back(ConflictLogEntry {
            timestamp: Utc::now(),
            work_item_id: report.work_item_id,
            kinds,
            strategy: resolution.strategy,
            action_taken: resolution.action_taken,
            resolved: resolution.resolved,
            current_hours: report.current_hours,
            proposed_hours: report.proposed_hours,
            final_value: resolution.final_value,
        });
    }

    /// Snapshot of the bounded conflict log, oldest first.
    pub fn conflict_log(&self) -> Vec<ConflictLogEntry> {
        self.log.lock().iter().cloned().collect()
    }

    pub fn clear_conflict_log(&self) {
        let mut log = self.log.lock();
        tracing::info!(entries = log.len(), "clearing conflict log");
        log.clear();
    }

    pub fn log_summary(&self) -> ConflictLogSummary {
        let log = self.log.lock();
        let mut summary = ConflictLogSummary {
            total: log.len(),
            ..Default::default()
        };
        for entry in log.iter() {
            if entry.resolved {
                summary.resolved += 1;
            } else {
                summary.failed += 1;
            }
            *summary
                .strategies_used
                .entry(entry.strategy.as_str().to_string())
                .or_insert(0) += 1;
        }
        summary
    }
}

// Builder-style payload setters used by detection.
trait ConflictExt {
    fn with_current(self, v: f64) -> Self;
    fn with_expected(self, v: f64) -> Self;
    fn with_proposed(self, v: f64) -> Self;
    fn with_estimate(self, v: f64) -> Self;
    fn with_ratio(self, v: f64) -> Self;
    fn with_state(self, s: &str) -> Self;
}

impl ConflictExt for Conflict {
    fn with_current(mut self, v: f64) -> Self {
        self.current_value = Some(v);
        self
    }
    fn with_expected(mut self, v: f64) -> Self {
        self.expected_value = Some(v);
        self
    }
    fn with_proposed(mut self, v: f64) -> Self {
        self.proposed_value = Some(v);
        self
    }
    fn with_estimate(mut self, v: f64) -> Self {
        self.estimate = Some(v);
        self
    }
    fn with_ratio(mut self, v: f64) -> Self {
        self.variance_ratio = Some(v);
        self
    }
    fn with_state(mut self, s: &str) -> Self {
        self.state = Some(s.to_string());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWorkItemStore;
    use tb_domain::work_item::{SchedulingFields, WorkItem};

    fn item(id: i64, state: &str, estimate: f64, completed: f64) -> WorkItem {
        WorkItem {
            id,
            title: format!("item {id}"),
            state: state.into(),
            assigned_to: None,
            work_item_type: "Task".into(),
            scheduling: SchedulingFields {
                original_estimate: estimate,
                completed_work: completed,
                remaining_work: 0.0,
            },
        }
    }

    fn resolver(store: FakeWorkItemStore, strategy: ConflictStrategy) -> ConflictResolver {
        ConflictResolver::new(Arc::new(store), strategy)
    }

    #[tokio::test]
    async fn clean_item_has_no_conflicts() {
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 0.0)]);
        let r = resolver(store, ConflictStrategy::Skip);

        let report = r.detect(1, 1.0, None).await;
        assert!(!report.has_conflicts());
        assert!(report.can_proceed);
        assert_eq!(report.current_hours, Some(0.0));

        let resolution = r.resolve(&report, None);
        assert!(resolution.resolved);
        assert_eq!(resolution.action_taken, ResolutionAction::NoConflicts);
        assert_eq!(resolution.final_value, Some(1.0));
        assert!(resolution.allows_write());
    }

    #[tokio::test]
    async fn manual_update_detected_and_skipped() {
        // E2: proposed 3.0, last_known 0, current 2.0 → skip keeps 2.0.
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 2.0)]);
        let r = resolver(store, ConflictStrategy::Skip);

        let report = r.detect(1, 3.0, Some(0.0)).await;
        assert!(report.has_kind(ConflictKind::ManualUpdate));
        assert!(report.can_proceed);

        let resolution = r.resolve(&report, None);
        assert!(resolution.resolved);
        assert_eq!(resolution.action_taken, ResolutionAction::Skip);
        assert_eq!(resolution.final_value, Some(2.0));
        assert!(!resolution.allows_write());
    }

    #[tokio::test]
    async fn value_mismatch_without_baseline() {
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 2.0)]);
        let r = resolver(store, ConflictStrategy::Skip);

        let report = r.detect(1, 3.0, None).await;
        assert!(report.only_kind(ConflictKind::ValueMismatch));
    }

    #[tokio::test]
    async fn unchanged_baseline_is_clean() {
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 2.0)]);
        let r = resolver(store, ConflictStrategy::Skip);

        let report = r.detect(1, 3.0, Some(2.0)).await;
        assert!(!report.has_conflicts());
    }

    #[tokio::test]
    async fn overbudget_detection() {
        // E3: estimate 4, proposed 11 → ratio 2.75 > 2.5.
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 4.0, 0.0)]);
        let r = resolver(store, ConflictStrategy::Skip);

        let report = r.detect(1, 11.0, None).await;
        assert!(report.has_kind(ConflictKind::Overbudget));
        let conflict = report
            .conflicts
            .iter()
            .find(|c| c.kind == ConflictKind::Overbudget)
            .unwrap();
        assert!((conflict.variance_ratio.unwrap() - 2.75).abs() < 1e-9);
        assert_eq!(r.recommended_strategy(&report), ConflictStrategy::Skip);
    }

    #[tokio::test]
    async fn locked_item_blocks() {
        // E5: state Removed → critical conflict, cannot proceed.
        let store = FakeWorkItemStore::with_items(vec![item(1, "Removed", 8.0, 0.0)]);
        let r = resolver(store, ConflictStrategy::Override);

        let report = r.detect(1, 1.0, None).await;
        assert!(report.has_kind(ConflictKind::WorkItemLocked));
        assert!(!report.can_proceed);

        let resolution = r.resolve(&report, None);
        assert!(!resolution.resolved);
        assert_eq!(resolution.action_taken, ResolutionAction::Blocked);
        assert!(!resolution.allows_write());
        assert_eq!(r.recommended_strategy(&report), ConflictStrategy::Fail);
    }

    #[tokio::test]
    async fn permission_denied_blocks() {
        let mut store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 0.0)]);
        store.deny_permission(1);
        let r = resolver(store, ConflictStrategy::Override);

        let report = r.detect(1, 1.0, None).await;
        assert!(report.has_kind(ConflictKind::PermissionDenied));
        assert!(!report.can_proceed);
    }

    #[tokio::test]
    async fn fetch_failure_cannot_proceed() {
        let store = FakeWorkItemStore::default();
        let r = resolver(store, ConflictStrategy::Override);

        let report = r.detect(999, 1.0, None).await;
        assert!(!report.can_proceed);
        assert!(report.error.is_some());
        // can_proceed=false ⇒ resolved=false.
        let resolution = r.resolve(&report, None);
        assert!(!resolution.resolved);
    }

    #[tokio::test]
    async fn override_and_add_strategies() {
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 2.0)]);
        let r = resolver(store, ConflictStrategy::Skip);
        let report = r.detect(1, 3.0, None).await;

        let o = r.resolve(&report, Some(ConflictStrategy::Override));
        assert_eq!(o.final_value, Some(3.0));
        assert!(o.allows_write());

        let a = r.resolve(&report, Some(ConflictStrategy::Add));
        assert_eq!(a.final_value, Some(5.0));
        assert!(a.allows_write());

        let f = r.resolve(&report, Some(ConflictStrategy::Fail));
        assert!(!f.resolved);
        assert_eq!(f.final_value, None);
    }

    #[tokio::test]
    async fn recommended_strategy_for_value_mismatch() {
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 2.0)]);
        let r = resolver(store, ConflictStrategy::Skip);

        // proposed > current → override
        let report = r.detect(1, 3.0, None).await;
        assert_eq!(r.recommended_strategy(&report), ConflictStrategy::Override);

        // proposed <= current → add
        let report = r.detect(1, 1.0, None).await;
        assert_eq!(r.recommended_strategy(&report), ConflictStrategy::Add);
    }

    #[tokio::test]
    async fn no_conflicts_recommends_override() {
        let store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 0.0)]);
        let r = resolver(store, ConflictStrategy::Skip);
        let report = r.detect(1, 1.0, None).await;
        assert_eq!(r.recommended_strategy(&report), ConflictStrategy::Override);
    }

    #[tokio::test]
    async fn log_records_every_attempt_in_order() {
        let store = FakeWorkItemStore::with_items(vec![
            item(1, "Active", 8.0, 2.0),
            item(2, "Active", 8.0, 0.0),
        ]);
        let r = resolver(store, ConflictStrategy::Skip);

        let r1 = r.detect(1, 3.0, None).await;
        let r2 = r.detect(2, 1.0, None).await;
        let batch = r.resolve_batch(&[r1, r2], None);

        assert_eq!(batch.total, 2);
        assert_eq!(batch.resolved, 2);
        let log = r.conflict_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].work_item_id, 1);
        assert_eq!(log[1].work_item_id, 2);

        let summary = r.log_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.resolved, 2);
        assert_eq!(summary.strategies_used["skip"], 2);

        r.clear_conflict_log();
        assert!(r.conflict_log().is_empty());
    }
}
