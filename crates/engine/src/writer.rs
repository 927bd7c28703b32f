//! Validated writes against the work-item store.
//!
//! Every update is validated (unless forced), compared against the
//! stored value to skip no-ops, short-circuited in dry-run mode, and
//! recorded in a bounded audit log. Writes inside a batch are strictly
//! serial so audit entries appear in input order.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use tb_clients::work_items::WorkItemStore;
use tb_domain::error::Error;

/// Hard ceiling on hours for one work item.
pub const MAX_COMPLETED_HOURS: f64 = 1000.0;

/// Ratio over the estimate beyond which a write becomes a warning.
const WARN_VARIANCE_RATIO: f64 = 1.5;

/// Most recent audit entries kept in memory.
const AUDIT_LOG_CAP: usize = 100;

/// Tolerance for "same hours" comparisons.
const HOURS_EPSILON: f64 = 1e-9;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One update to apply.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub work_item_id: i64,
    pub completed_hours: f64,
    pub comment: Option<String>,
}

/// Result of one update attempt.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub work_item_id: i64,
    pub completed_hours: f64,
    pub success: bool,
    /// `false` for no-ops and dry runs even when `success` is true.
    pub updated: bool,
    pub dry_run: bool,
    pub validation_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub previous_value: Option<f64>,
    pub new_value: Option<f64>,
}

impl UpdateOutcome {
    fn pending(work_item_id: i64, completed_hours: f64, dry_run: bool) -> Self {
        Self {
            work_item_id,
            completed_hours,
            success: false,
            updated: false,
            dry_run,
            validation_errors: Vec::new(),
            warnings: Vec::new(),
            previous_value: None,
            new_value: None,
        }
    }
}

/// Validation verdict for one prospective update.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// One entry in the bounded audit log; one per write attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub work_item_id: i64,
    pub previous_value: Option<f64>,
    pub new_value: Option<f64>,
    pub success: bool,
    pub updated: bool,
    pub dry_run: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Summary of one batch of updates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchUpdateOutcome {
    /// Items actually processed (early abort leaves the rest untouched).
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: bool,
    pub items: Vec<UpdateOutcome>,
}

/// Audit-log statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditSummary {
    pub total_operations: usize,
    pub successful_updates: usize,
    pub failed_updates: usize,
    pub skipped_updates: usize,
    pub dry_run_mode: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Applies completed-work updates with validation and an audit trail.
pub struct WorkItemWriter {
    store: Arc<dyn WorkItemStore>,
    dry_run: bool,
    max_variance_threshold: f64,
    audit_log: Mutex<VecDeque<AuditEntry>>,
}

impl WorkItemWriter {
    pub fn new(store: Arc<dyn WorkItemStore>, dry_run: bool, max_variance_threshold: f64) -> Self {
        tracing::info!(dry_run, max_variance_threshold, "work-item writer ready");
        Self {
            store,
            dry_run,
            max_variance_threshold,
            audit_log: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    // ── Validation ───────────────────────────────────────────────────

    /// Check that an update is safe to perform.
    pub async fn validate_update(&self, work_item_id: i64, hours: f64) -> ValidationOutcome {
        let mut outcome = ValidationOutcome {
            valid: true,
            ..Default::default()
        };

        if hours < 0.0 {
            outcome.valid = false;
            outcome
                .errors
                .push("completed hours cannot be negative".into());
            return outcome;
        }
        if hours > MAX_COMPLETED_HOURS {
            outcome.valid = false;
            outcome.errors.push(format!(
                "completed hours ({hours}) exceeds reasonable limit ({MAX_COMPLETED_HOURS}h)"
            ));
            return outcome;
        }

        let item = match self.store.get_work_item(work_item_id, None).await {
            Ok(item) => item,
            Err(e) => {
                outcome.valid = false;
                outcome.errors.push(format!("validation error: {e}"));
                return outcome;
            }
        };

        if matches!(item.state.as_str(), "Removed" | "Closed") {
            outcome
                .warnings
                .push(format!("work item is in '{}' state", item.state));
        }

        let estimate = item.scheduling.original_estimate;
        if estimate > 0.0 {
            let ratio = hours / estimate;
            if ratio > self.max_variance_threshold {
                outcome.valid = false;
                outcome.errors.push(format!(
                    "completed hours ({hours}h) exceeds {}x the original estimate ({estimate}h)",
                    self.max_variance_threshold
                ));
            } else if ratio > WARN_VARIANCE_RATIO {
                outcome.warnings.push(format!(
                    "completed hours ({hours}h) is {ratio:.1}x the original estimate ({estimate}h)"
                ));
            }
        } else {
            outcome
                .warnings
                .push("no original estimate defined for this work item".into());
        }

        match self.store.validate_permissions(work_item_id).await {
            Ok(true) => {}
            Ok(false) => {
                outcome.valid = false;
                outcome.errors.push(format!(
                    "insufficient permissions to update work item #{work_item_id}"
                ));
            }
            Err(e) => {
                outcome.valid = false;
                outcome.errors.push(format!("permission check failed: {e}"));
            }
        }

        outcome
    }

    // ── Single update ────────────────────────────────────────────────

    /// Update completed work for one item; see the module docs for the
    /// decision ladder.
    pub async fn update_completed_work(
        &self,
        work_item_id: i64,
        hours: f64,
        comment: Option<&str>,
        force: bool,
    ) -> UpdateOutcome {
        tracing::info!(work_item_id, hours, force, "processing update");
        let mut outcome = UpdateOutcome::pending(work_item_id, hours, self.dry_run);

        if !force {
            let validation = self.validate_update(work_item_id, hours).await;
            outcome.warnings = validation.warnings;
            if !validation.valid {
                outcome.validation_errors = validation.errors;
                tracing::warn!(
                    work_item_id,
                    errors = ?outcome.validation_errors,
                    "update failed validation"
                );
                self.audit(&outcome);
                return outcome;
            }
        }

        let current = match self.store.get_work_item(work_item_id, None).await {
            Ok(item) => item.scheduling.completed_work,
            Err(e) => {
                outcome.validation_errors.push(format!("update failed: {e}"));
                self.audit(&outcome);
                return outcome;
            }
        };
        outcome.previous_value = Some(current);

        // No-op: the store already has this value.
        if (current - hours).abs() < HOURS_EPSILON {
            tracing::info!(work_item_id, hours, "value unchanged, skipping write");
            outcome.success = true;
            outcome.new_value = Some(hours);
            self.audit(&outcome);
            return outcome;
        }

        if self.dry_run {
            tracing::info!(
                work_item_id,
                from = current,
                to = hours,
                "dry run: would update"
            );
            outcome.success = true;
            outcome.new_value = Some(hours);
            self.audit(&outcome);
            return outcome;
        }

        let default_comment = format!(
            "Tiempo completado actualizado automáticamente a {hours} horas por TimeBridge"
        );
        let comment = comment.unwrap_or(&default_comment);

        match self
            .store
            .update_completed_work(work_item_id, hours, Some(comment))
            .await
        {
            Ok(_) => {
                tracing::info!(work_item_id, from = current, to = hours, "work item updated");
                outcome.success = true;
                outcome.updated = true;
                outcome.new_value = Some(hours);
            }
            Err(e) => {
                tracing::error!(work_item_id, error = %e, "update failed");
                outcome
                    .validation_errors
                    .push(Error::WriteRejected {
                        work_item_id,
                        message: e.to_string(),
                    }
                    .to_string());
            }
        }

        self.audit(&outcome);
        outcome
    }

    // ── Batch ────────────────────────────────────────────────────────

    /// Apply updates serially; `stop_on_error` aborts after the first
    /// hard failure, leaving the remaining items unprocessed.
    pub async fn update_batch(
        &self,
        updates: &[UpdateRequest],
        stop_on_error: bool,
    ) -> BatchUpdateOutcome {
        tracing::info!(count = updates.len(), "processing update batch");
        let mut outcome = BatchUpdateOutcome::default();

        for update in updates {
            let item = self
                .update_completed_work(
                    update.work_item_id,
                    update.completed_hours,
                    update.comment.as_deref(),
                    false,
                )
                .await;

            outcome.total += 1;
            if item.success {
                if item.updated {
                    outcome.successful += 1;
                } else {
                    outcome.skipped += 1;
                }
            } else {
                outcome.failed += 1;
            }
            let failed = !item.success;
            outcome.items.push(item);

            if failed && stop_on_error {
                tracing::error!(
                    work_item_id = update.work_item_id,
                    "stopping batch on first failure"
                );
                outcome.aborted = true;
                break;
            }
        }

        tracing::info!(
            successful = outcome.successful,
            failed = outcome.failed,
            skipped = outcome.skipped,
            "batch complete"
        );
        outcome
    }

    // ── Audit log ────────────────────────────────────────────────────

    fn audit(&self, outcome: &UpdateOutcome) {
        let mut log = self.audit_log.lock();
        if log.len() == AUDIT_LOG_CAP {
            log.pop_front();
        }
        log.push_back(AuditEntry {
            timestamp: Utc::now(),
            work_item_id: outcome.work_item_id,
            previous_value: outcome.previous_value,
            new_value: outcome.new_value,
            success: outcome.success,
            updated: outcome.updated,
            dry_run: outcome.dry_run,
            errors: outcome.validation_errors.clone(),
            warnings: outcome.warnings.clone(),
        });
    }

    /// Snapshot of the bounded audit log, oldest first.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit_log.lock().iter().cloned().collect()
    }

    pub fn clear_audit_log(&self) {
        let mut log = self.audit_log.lock();
        tracing::info!(entries = log.len(), "clearing audit log");
        log.clear();
    }

    pub fn audit_summary(&self) -> AuditSummary {
        let log = self.audit_log.lock();
        AuditSummary {
            total_operations: log.len(),
            successful_updates: log.iter().filter(|e| e.success && e.updated).count(),
            failed_updates: log.iter().filter(|e| !e.success).count(),
            skipped_updates: log.iter().filter(|e| e.success && !e.updated).count(),
            dry_run_mode: self.dry_run,
        }
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

    fn writer(store: FakeWorkItemStore, dry_run: bool) -> (WorkItemWriter, Arc<FakeWorkItemStore>) {
        let store = Arc::new(store);
        (WorkItemWriter::new(store.clone(), dry_run, 2.0), store)
    }

    #[tokio::test]
    async fn happy_path_writes_and_audits() {
        // E1: estimate 8, current 0, write 1.0.
        let (w, store) = writer(
            FakeWorkItemStore::with_items(vec![item(42, "Active", 8.0, 0.0)]),
            false,
        );

        let outcome = w.update_completed_work(42, 1.0, None, false).await;
        assert!(outcome.success);
        assert!(outcome.updated);
        assert_eq!(outcome.previous_value, Some(0.0));
        assert_eq!(outcome.new_value, Some(1.0));
        assert_eq!(store.completed_work(42), Some(1.0));
        assert_eq!(w.audit_log().len(), 1);
        assert!(!w.audit_log()[0].dry_run);

        // The default comment is Spanish and mentions the tool.
        let calls = store.update_calls();
        assert_eq!(calls.len(), 1);
        let comment = calls[0].2.as_deref().unwrap();
        assert!(comment.contains("1 horas"));
        assert!(comment.contains("TimeBridge"));
    }

    #[tokio::test]
    async fn noop_when_value_already_set() {
        let (w, store) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 2.0)]),
            false,
        );
        let outcome = w.update_completed_work(1, 2.0, None, false).await;
        assert!(outcome.success);
        assert!(!outcome.updated);
        assert!(store.update_calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_never_writes() {
        // E4: estimate 8, proposed 5, current 0, dry_run on.
        let (w, store) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 0.0)]),
            true,
        );
        let outcome = w.update_completed_work(1, 5.0, None, false).await;
        assert!(outcome.success);
        assert!(!outcome.updated);
        assert!(outcome.dry_run);
        assert!(store.update_calls().is_empty());
        assert_eq!(store.completed_work(1), Some(0.0));

        let audit = w.audit_log();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].dry_run);
    }

    #[tokio::test]
    async fn hours_bounds_are_hard_failures() {
        let (w, _) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Active", 0.0, 0.0)]),
            false,
        );

        let negative = w.update_completed_work(1, -1.0, None, false).await;
        assert!(!negative.success);
        assert!(negative.validation_errors[0].contains("negative"));

        let huge = w.update_completed_work(1, 1000.5, None, false).await;
        assert!(!huge.success);
        assert!(huge.validation_errors[0].contains("1000"));
    }

    #[tokio::test]
    async fn variance_threshold_fails_and_warns() {
        let (w, _) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Active", 4.0, 0.0)]),
            false,
        );

        // 9/4 = 2.25 > 2.0 → hard fail.
        let over = w.update_completed_work(1, 9.0, None, false).await;
        assert!(!over.success);

        // 7/4 = 1.75 → warning only.
        let warn = w.update_completed_work(1, 7.0, None, false).await;
        assert!(warn.success);
        assert!(warn.warnings.iter().any(|m| m.contains("1.8x")));
    }

    #[tokio::test]
    async fn closed_state_is_only_a_warning() {
        let (w, _) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Closed", 8.0, 0.0)]),
            false,
        );
        let outcome = w.update_completed_work(1, 2.0, None, false).await;
        assert!(outcome.success);
        assert!(outcome.warnings.iter().any(|m| m.contains("Closed")));
    }

    #[tokio::test]
    async fn permission_denied_is_a_hard_failure() {
        let mut store = FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 0.0)]);
        store.deny_permission(1);
        let (w, fake) = writer(store, false);

        let outcome = w.update_completed_work(1, 2.0, None, false).await;
        assert!(!outcome.success);
        assert!(fake.update_calls().is_empty());
    }

    #[tokio::test]
    async fn force_bypasses_validation() {
        let (w, store) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Active", 4.0, 0.0)]),
            false,
        );
        // 20/4 = 5x would fail validation, but force skips it.
        let outcome = w.update_completed_work(1, 20.0, None, true).await;
        assert!(outcome.success);
        assert_eq!(store.completed_work(1), Some(20.0));
    }

    #[tokio::test]
    async fn batch_counts_sum_to_total() {
        let mut store = FakeWorkItemStore::with_items(vec![
            item(1, "Active", 8.0, 0.0),
            item(2, "Active", 8.0, 3.0),
            item(3, "Active", 8.0, 0.0),
        ]);
        store.fail_update(3);
        let (w, _) = writer(store, false);

        let updates = vec![
            UpdateRequest {
                work_item_id: 1,
                completed_hours: 2.0,
                comment: None,
            },
            UpdateRequest {
                work_item_id: 2,
                completed_hours: 3.0, // no-op
                comment: None,
            },
            UpdateRequest {
                work_item_id: 3,
                completed_hours: 2.0, // store rejects the write
                comment: None,
            },
        ];
        let outcome = w.update_batch(&updates, false).await;

        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.successful, 1);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(
            outcome.successful + outcome.failed + outcome.skipped,
            outcome.total
        );
        assert!(!outcome.aborted);

        // Audit entries in input order.
        let audit = w.audit_log();
        let ids: Vec<i64> = audit.iter().map(|e| e.work_item_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stop_on_error_aborts_batch() {
        let mut store = FakeWorkItemStore::with_items(vec![
            item(1, "Active", 8.0, 0.0),
            item(2, "Active", 8.0, 0.0),
        ]);
        store.fail_update(1);
        let (w, fake) = writer(store, false);

        let updates = vec![
            UpdateRequest {
                work_item_id: 1,
                completed_hours: 2.0,
                comment: None,
            },
            UpdateRequest {
                work_item_id: 2,
                completed_hours: 2.0,
                comment: None,
            },
        ];
        let outcome = w.update_batch(&updates, true).await;

        assert!(outcome.aborted);
        assert_eq!(outcome.total, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(fake.completed_work(2), Some(0.0));
    }

    #[tokio::test]
    async fn audit_summary_counts() {
        let (w, _) = writer(
            FakeWorkItemStore::with_items(vec![item(1, "Active", 8.0, 0.0)]),
            false,
        );
        w.update_completed_work(1, 2.0, None, false).await;
        w.update_completed_work(1, 2.0, None, false).await; // no-op
        w.update_completed_work(1, -5.0, None, false).await; // invalid

        let summary = w.audit_summary();
        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.successful_updates, 1);
        assert_eq!(summary.skipped_updates, 1);
        assert_eq!(summary.failed_updates, 1);
        assert!(!summary.dry_run_mode);

        w.clear_audit_log();
        assert!(w.audit_log().is_empty());
    }
}
