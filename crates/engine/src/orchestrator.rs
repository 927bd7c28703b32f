//! The six-stage reconciliation pipeline.
//!
//! One invocation processes a half-open date range `[start, end)` for an
//! optional set of users and an optional project scope and returns a
//! structured [`ExecutionRecord`]. Stages run sequentially; a non-fatal
//! stage error is recorded into `errors` and downstream stages continue
//! on empty inputs. Only a transport/auth failure in the very first
//! stage, cancellation, or a run timeout end the run early.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use tb_clients::calendar::{CalendarSource, RawEvent};
use tb_clients::work_items::{open_items_wiql, WorkItemStore, DEFAULT_QUERY_TOP};
use tb_domain::comparison::{Comparison, ComparisonStats};
use tb_domain::conflict::ConflictStrategy;
use tb_domain::error::Error;
use tb_domain::meeting::MeetingSummary;
use tb_domain::work_item::WorkItem;

use crate::comparator::{ComparisonInput, TimeComparator};
use crate::matcher::{MatchOutcome, MeetingMatcher, UnmatchedSummary};
use crate::normalizer::MeetingNormalizer;
use crate::reports::{ReportFiles, ReportGenerator};
use crate::resolver::ConflictResolver;
use crate::writer::{UpdateRequest, WorkItemWriter};

/// Most recent execution records kept in memory.
const EXECUTION_LOG_CAP: usize = 100;

/// Default bound on concurrent work-item reads per run.
const DEFAULT_READ_CONCURRENCY: usize = 8;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration / request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub dry_run: bool,
    pub conflict_strategy: ConflictStrategy,
    pub timezone: Tz,
    /// Principal used when a run names no users.
    pub default_user: String,
    pub page_size: u32,
    /// Cap on WIQL results per run.
    pub query_top: usize,
    /// Bound on concurrent work-item reads.
    pub read_concurrency: usize,
    /// Optional whole-run timeout.
    pub run_timeout: Option<std::time::Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            conflict_strategy: ConflictStrategy::default(),
            timezone: chrono_tz::UTC,
            default_user: "me".into(),
            page_size: 100,
            query_top: DEFAULT_QUERY_TOP,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
            run_timeout: None,
        }
    }
}

/// Parameters of one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Defaults to yesterday (local zone).
    pub start_date: Option<NaiveDate>,
    /// Defaults to today (local zone); the range is half-open.
    pub end_date: Option<NaiveDate>,
    pub users: Option<Vec<String>>,
    pub project: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize)]
pub struct EventsStage {
    pub total_events: usize,
    pub per_user: BTreeMap<String, usize>,
    pub failed_users: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MeetingsStage {
    pub normalized: usize,
    pub summary: MeetingSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkItemsStage {
    pub queried: usize,
    pub fetched: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchingStage {
    pub matched: usize,
    pub unmatched: usize,
    pub match_rate: f64,
    pub unmatched_summary: UnmatchedSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonStage {
    pub compared: usize,
    pub statistics: ComparisonStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateStage {
    /// Comparisons considered for writing.
    pub proposed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageRecords {
    pub events: Option<EventsStage>,
    pub meetings: Option<MeetingsStage>,
    pub work_items: Option<WorkItemsStage>,
    pub matching: Option<MatchingStage>,
    pub comparison: Option<ComparisonStage>,
    pub updates: Option<UpdateStage>,
    pub reports: Option<ReportFiles>,
}

/// Headline counters for operators.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_meetings: usize,
    pub matched_meetings: usize,
    pub unmatched_meetings: usize,
    pub work_items_updated: usize,
    pub work_items_failed: usize,
    pub work_items_skipped: usize,
    pub reports_generated: usize,
}

/// The structured record of one pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub dry_run: bool,
    pub success: bool,
    pub stages: StageRecords,
    pub errors: Vec<String>,
    pub summary: RunSummary,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    calendar: Arc<dyn CalendarSource>,
    store: Arc<dyn WorkItemStore>,
    normalizer: MeetingNormalizer,
    matcher: MeetingMatcher,
    comparator: TimeComparator,
    resolver: ConflictResolver,
    writer: WorkItemWriter,
    reports: Option<ReportGenerator>,
    cfg: OrchestratorConfig,
    cancel: CancellationToken,
    execution_log: Mutex<VecDeque<ExecutionRecord>>,
}

impl Orchestrator {
    pub fn new(
        calendar: Arc<dyn CalendarSource>,
        store: Arc<dyn WorkItemStore>,
        reports: Option<ReportGenerator>,
        cfg: OrchestratorConfig,
        cancel: CancellationToken,
    ) -> Self {
        tracing::info!(
            dry_run = cfg.dry_run,
            strategy = cfg.conflict_strategy.as_str(),
            timezone = %cfg.timezone,
            "orchestrator ready"
        );
        Self {
            calendar,
            store: store.clone(),
            normalizer: MeetingNormalizer::new(cfg.timezone),
            matcher: MeetingMatcher::default(),
            comparator: TimeComparator::default(),
            resolver: ConflictResolver::new(store.clone(), cfg.conflict_strategy),
            writer: WorkItemWriter::new(store, cfg.dry_run, 2.0),
            reports,
            cfg,
            cancel,
            execution_log: Mutex::new(VecDeque::new()),
        }
    }

    /// Replace the matcher (to install custom rules or thresholds).
    pub fn with_matcher(mut self, matcher: MeetingMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    /// Replace the comparator thresholds.
    pub fn with_comparator(mut self, comparator: TimeComparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn writer(&self) -> &WorkItemWriter {
        &self.writer
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ── Run ──────────────────────────────────────────────────────────

    /// Execute the complete reconciliation workflow.
    pub async fn run(&self, req: RunRequest) -> ExecutionRecord {
        let started_at = Utc::now();
        let deadline = self.cfg.run_timeout.map(|t| Instant::now() + t);

        let today = started_at.with_timezone(&self.cfg.timezone).date_naive();
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let start_date = req.start_date.unwrap_or(yesterday);
        let end_date = req.end_date.unwrap_or(today);

        let mut record = ExecutionRecord {
            execution_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: started_at,
            start_date,
            end_date,
            dry_run: self.cfg.dry_run,
            success: false,
            stages: StageRecords::default(),
            errors: Vec::new(),
            summary: RunSummary::default(),
        };

        tracing::info!(
            execution_id = %record.execution_id,
            %start_date, %end_date,
            "starting execution"
        );

        let mut fatal = false;
        'pipeline: {
            // Stage 1: fetch events.
            let users = req
                .users
                .clone()
                .unwrap_or_else(|| vec![self.cfg.default_user.clone()]);
            let (events, stage, stage_fatal) =
                self.fetch_events(&users, start_date, end_date, &mut record.errors).await;
            record.stages.events = Some(stage);
            if stage_fatal {
                tracing::error!("calendar fetch failed for every user; aborting run");
                fatal = true;
                break 'pipeline;
            }
            if self.interrupted(&deadline, &mut record.errors) {
                fatal = true;
                break 'pipeline;
            }

            // Stage 2: normalise.
            let meetings = self.normalizer.normalize(&events);
            record.stages.meetings = Some(MeetingsStage {
                normalized: meetings.len(),
                summary: self.normalizer.summary(&meetings),
            });
            record.summary.total_meetings = meetings.len();
            if meetings.is_empty() {
                record
                    .errors
                    .push(Error::NoMeetings("no meetings in range".into()).to_string());
            }

            // Stage 3: fetch candidate work items.
            let work_items = self
                .fetch_work_items(req.project.as_deref(), &mut record.errors)
                .await;
            record.stages.work_items = Some(WorkItemsStage {
                queried: work_items.0,
                fetched: work_items.1.len(),
            });
            let work_items = work_items.1;
            if self.interrupted(&deadline, &mut record.errors) {
                fatal = true;
                break 'pipeline;
            }

            // Stage 4: match.
            let outcome = self.matcher.match_batch(&meetings, &work_items);
            record.stages.matching = Some(MatchingStage {
                matched: outcome.matched.len(),
                unmatched: outcome.unmatched.len(),
                match_rate: outcome.match_rate,
                unmatched_summary: MeetingMatcher::unmatched_summary(&outcome.unmatched),
            });
            record.summary.matched_meetings = outcome.matched.len();
            record.summary.unmatched_meetings = outcome.unmatched.len();

            // Stage 5: aggregate and compare.
            let inputs = build_comparison_inputs(&outcome, &work_items);
            let (comparisons, statistics) = self.comparator.compare_batch(inputs);
            record.stages.comparison = Some(ComparisonStage {
                compared: comparisons.len(),
                statistics: statistics.clone(),
            });
            if self.interrupted(&deadline, &mut record.errors) {
                fatal = true;
                break 'pipeline;
            }

            // Stage 6: resolve conflicts and write.
            let updates = self.apply_updates(&comparisons).await;
            record.summary.work_items_updated = updates.successful;
            record.summary.work_items_failed = updates.failed;
            record.summary.work_items_skipped = updates.skipped;
            record.stages.updates = Some(updates);
            if self.interrupted(&deadline, &mut record.errors) {
                fatal = true;
                break 'pipeline;
            }

            // Stage 7: reports.
            if let Some(ref generator) = self.reports {
                match generator.daily_report(start_date, &comparisons, &statistics) {
                    Ok(files) => {
                        record.summary.reports_generated = 2;
                        record.stages.reports = Some(files);
                    }
                    Err(e) => record.errors.push(format!("report generation: {e}")),
                }
            }
        }

        record.success = !fatal;
        record.finished_at = Utc::now();

        tracing::info!(
            execution_id = %record.execution_id,
            success = record.success,
            updated = record.summary.work_items_updated,
            skipped = record.summary.work_items_skipped,
            failed = record.summary.work_items_failed,
            errors = record.errors.len(),
            "execution finished"
        );

        let mut log = self.execution_log.lock();
        if log.len() == EXECUTION_LOG_CAP {
            log.pop_front();
        }
        log.push_back(record.clone());
        drop(log);

        record
    }

    /// The most recent execution record, if any run happened.
    pub fn last_execution(&self) -> Option<ExecutionRecord> {
        self.execution_log.lock().back().cloned()
    }

    pub fn execution_log(&self) -> Vec<ExecutionRecord> {
        self.execution_log.lock().iter().cloned().collect()
    }

    // ── Stage 1 ──────────────────────────────────────────────────────

    async fn fetch_events(
        &self,
        users: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
        errors: &mut Vec<String>,
    ) -> (Vec<RawEvent>, EventsStage, bool) {
        let window = (
            self.local_midnight(start_date),
            self.local_midnight(end_date),
        );

        let mut set = JoinSet::new();
        for user in users {
            let calendar = self.calendar.clone();
            let user = user.clone();
            let page_size = self.cfg.page_size;
            set.spawn(async move {
                let result = calendar
                    .get_calendar_events(&user, Some(window), page_size, true)
                    .await;
                (user, result)
            });
        }

        let mut events = Vec::new();
        let mut stage = EventsStage::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((user, Ok(batch))) => {
                    stage.per_user.insert(user, batch.len());
                    events.extend(batch);
                }
                Ok((user, Err(e))) => {
                    errors.push(format!("calendar fetch for {user}: {e}"));
                    stage.failed_users.push(user);
                }
                Err(e) => errors.push(format!("calendar fetch task failed: {e}")),
            }
        }
        stage.failed_users.sort();
        stage.total_events = events.len();

        // The run is unusable when no user's calendar could be read.
        let fatal = stage.per_user.is_empty() && !stage.failed_users.is_empty();
        (events, stage, fatal)
    }

    // ── Stage 3 ──────────────────────────────────────────────────────

    async fn fetch_work_items(
        &self,
        project: Option<&str>,
        errors: &mut Vec<String>,
    ) -> (usize, Vec<WorkItem>) {
        let ids = match self
            .store
            .query_work_items(&open_items_wiql(), project, self.cfg.query_top)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                errors.push(format!("work item query: {e}"));
                return (0, Vec::new());
            }
        };

        if ids.is_empty() {
            errors.push(Error::NoWorkItems("query returned no candidates".into()).to_string());
            return (0, Vec::new());
        }

        // Bounded fan-out; results are re-ordered to the query order.
        let semaphore = Arc::new(Semaphore::new(self.cfg.read_concurrency.max(1)));
        let mut set = JoinSet::new();
        for (index, id) in ids.iter().copied().enumerate() {
            let store = self.store.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, id, store.get_work_item(id, None).await)
            });
        }

        let mut fetched: Vec<(usize, WorkItem)> = Vec::with_capacity(ids.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, _, Ok(item))) => fetched.push((index, item)),
                Ok((_, id, Err(Error::NotFound(_)))) => {
                    tracing::warn!(work_item_id = id, "work item vanished between query and fetch");
                }
                Ok((_, id, Err(e))) => {
                    errors.push(format!("work item #{id} fetch: {e}"));
                }
                Err(e) => errors.push(format!("work item fetch task failed: {e}")),
            }
        }
        fetched.sort_by_key(|(index, _)| *index);

        (ids.len(), fetched.into_iter().map(|(_, item)| item).collect())
    }

    // ── Stage 6 ──────────────────────────────────────────────────────

    async fn apply_updates(&self, comparisons: &[Comparison]) -> UpdateStage {
        let mut updates: Vec<UpdateRequest> = Vec::new();
        let mut skipped = 0usize;

        for c in comparisons {
            let report = self.resolver.detect(c.work_item_id, c.actual_hours, None).await;

            let request = if report.has_conflicts() || !report.can_proceed {
                let resolution = self.resolver.resolve(&report, None);
                if resolution.allows_write() {
                    resolution.final_value
                } else {
                    tracing::warn!(
                        work_item_id = c.work_item_id,
                        action = ?resolution.action_taken,
                        "work item skipped by conflict resolution"
                    );
                    skipped += 1;
                    None
                }
            } else {
                Some(c.actual_hours)
            };

            if let Some(hours) = request {
                updates.push(UpdateRequest {
                    work_item_id: c.work_item_id,
                    completed_hours: hours,
                    comment: Some(format!(
                        "Actualización automática: {hours} horas (reuniones: {}h)",
                        c.meeting_hours.unwrap_or(0.0)
                    )),
                });
            }
        }

        let batch = self.writer.update_batch(&updates, false).await;
        UpdateStage {
            proposed: comparisons.len(),
            successful: batch.successful,
            failed: batch.failed,
            skipped: skipped + batch.skipped,
            aborted: batch.aborted,
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Midnight of `date` in the configured zone (DST gaps fall back to
    /// interpreting the naive time as UTC).
    fn local_midnight(&self, date: NaiveDate) -> DateTime<Tz> {
        let naive = date.and_time(NaiveTime::MIN);
        match self.cfg.timezone.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(dt, _) => dt,
            LocalResult::None => self.cfg.timezone.from_utc_datetime(&naive),
        }
    }

    /// Record cancellation or an exceeded run deadline; `true` ends the run.
    fn interrupted(&self, deadline: &Option<Instant>, errors: &mut Vec<String>) -> bool {
        if self.cancel.is_cancelled() {
            errors.push(Error::Cancelled("run aborted".into()).to_string());
            return true;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= *deadline {
                errors.push(Error::Timeout("run timeout exceeded".into()).to_string());
                return true;
            }
        }
        false
    }
}

/// Group matches by work item, summing meeting durations against the
/// estimates fetched in stage 3.
fn build_comparison_inputs(outcome: &MatchOutcome, work_items: &[WorkItem]) -> Vec<ComparisonInput> {
    let estimates: HashMap<i64, f64> = work_items
        .iter()
        .map(|w| (w.id, w.scheduling.original_estimate))
        .collect();

    let mut grouped: BTreeMap<i64, ComparisonInput> = BTreeMap::new();
    for m in &outcome.matched {
        let entry = grouped.entry(m.work_item_id).or_insert_with(|| ComparisonInput {
            work_item_id: m.work_item_id,
            title: m.work_item_title.clone(),
            estimated_hours: estimates.get(&m.work_item_id).copied().unwrap_or(0.0),
            actual_hours: 0.0,
            meeting_hours: Some(0.0),
            execution_hours: None,
        });
        entry.actual_hours += m.duration_hours;
        entry.meeting_hours = Some(entry.meeting_hours.unwrap_or(0.0) + m.duration_hours);
    }
    grouped.into_values().collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MeetingMatch;
    use crate::testing::{FakeCalendarSource, FakeWorkItemStore};
    use tb_clients::calendar::{Attendee, EmailAddress, EventTime};
    use tb_domain::work_item::SchedulingFields;

    fn event(id: &str, subject: &str, start: &str, end: &str) -> RawEvent {
        RawEvent {
            id: id.into(),
            subject: Some(subject.into()),
            start: Some(EventTime {
                date_time: start.into(),
                time_zone: Some("UTC".into()),
            }),
            end: Some(EventTime {
                date_time: end.into(),
                time_zone: Some("UTC".into()),
            }),
            attendees: vec![Attendee {
                email_address: Some(EmailAddress {
                    address: "ana@contoso.com".into(),
                    name: None,
                }),
            }],
            organizer: None,
            is_cancelled: false,
            is_online_meeting: true,
            online_meeting_provider: None,
        }
    }

    fn item(id: i64, title: &str, state: &str, estimate: f64, completed: f64) -> WorkItem {
        WorkItem {
            id,
            title: title.into(),
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

    fn orchestrator(
        calendar: FakeCalendarSource,
        store: FakeWorkItemStore,
        cfg: OrchestratorConfig,
    ) -> (Orchestrator, Arc<FakeWorkItemStore>) {
        let store = Arc::new(store);
        (
            Orchestrator::new(
                Arc::new(calendar),
                store.clone(),
                None,
                cfg,
                CancellationToken::new(),
            ),
            store,
        )
    }

    fn request() -> RunRequest {
        RunRequest {
            start_date: Some("2025-03-10".parse().unwrap()),
            end_date: Some("2025-03-11".parse().unwrap()),
            users: Some(vec!["ana@contoso.com".into()]),
            project: None,
        }
    }

    #[tokio::test]
    async fn happy_path_one_meeting_one_task() {
        // E1: "#42 Sync", 1h, estimate 8h, completed 0 → write 1.0.
        let calendar = FakeCalendarSource::with_events(vec![event(
            "ev1",
            "#42 Sync",
            "2025-03-10T14:00:00Z",
            "2025-03-10T15:00:00Z",
        )]);
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync estimates", "Active", 8.0, 0.0)]);
        let (o, fake) = orchestrator(calendar, store, OrchestratorConfig::default());

        let record = o.run(request()).await;
        assert!(record.success, "errors: {:?}", record.errors);
        assert_eq!(record.summary.total_meetings, 1);
        assert_eq!(record.summary.matched_meetings, 1);
        assert_eq!(record.summary.work_items_updated, 1);
        assert_eq!(fake.completed_work(42), Some(1.0));
        assert_eq!(o.writer().audit_log().len(), 1);

        let comparison = &record.stages.comparison.as_ref().unwrap().statistics;
        assert_eq!(comparison.total_actual_hours, 1.0);
    }

    #[tokio::test]
    async fn skip_strategy_keeps_existing_value() {
        // E2-shaped: the item already carries hours and the default skip
        // strategy keeps them; the writer is never called.
        let calendar = FakeCalendarSource::with_events(vec![event(
            "ev1",
            "#42 Sync",
            "2025-03-10T14:00:00Z",
            "2025-03-10T17:00:00Z",
        )]);
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync", "Active", 8.0, 2.0)]);
        let (o, fake) = orchestrator(calendar, store, OrchestratorConfig::default());

        let record = o.run(request()).await;
        assert!(record.success);
        assert_eq!(record.summary.work_items_updated, 0);
        assert_eq!(record.summary.work_items_skipped, 1);
        assert_eq!(fake.completed_work(42), Some(2.0));
        assert!(fake.update_calls().is_empty());
    }

    #[tokio::test]
    async fn locked_item_counts_as_skipped_not_failed() {
        // E5: Removed item → resolution blocked → skipped.
        let calendar = FakeCalendarSource::with_events(vec![event(
            "ev1",
            "#42 Sync",
            "2025-03-10T14:00:00Z",
            "2025-03-10T15:00:00Z",
        )]);
        // Removed items are excluded by the WIQL in reality; force one into
        // the candidate set to exercise the resolver path.
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync", "Removed", 8.0, 0.0)])
            .with_terminal_in_queries();
        let (o, fake) = orchestrator(calendar, store, OrchestratorConfig::default());

        let record = o.run(request()).await;
        assert!(record.success);
        assert_eq!(record.summary.work_items_skipped, 1);
        assert_eq!(record.summary.work_items_failed, 0);
        assert!(fake.update_calls().is_empty());
    }

    #[tokio::test]
    async fn dry_run_records_intended_values_without_writes() {
        // E4 at pipeline level.
        let calendar = FakeCalendarSource::with_events(vec![event(
            "ev1",
            "#42 Sync",
            "2025-03-10T14:00:00Z",
            "2025-03-10T19:00:00Z",
        )]);
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync", "Active", 8.0, 0.0)]);
        let cfg = OrchestratorConfig {
            dry_run: true,
            ..Default::default()
        };
        let (o, fake) = orchestrator(calendar, store, cfg);

        let record = o.run(request()).await;
        assert!(record.success);
        assert!(record.dry_run);
        assert_eq!(record.summary.work_items_updated, 0);
        assert_eq!(record.summary.work_items_skipped, 1);
        assert!(fake.update_calls().is_empty());

        let audit = o.writer().audit_log();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].dry_run);
        assert_eq!(audit[0].new_value, Some(5.0));
    }

    #[tokio::test]
    async fn calendar_failure_for_all_users_is_fatal() {
        let calendar = FakeCalendarSource::failing();
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync", "Active", 8.0, 0.0)]);
        let (o, _) = orchestrator(calendar, store, OrchestratorConfig::default());

        let record = o.run(request()).await;
        assert!(!record.success);
        assert!(!record.errors.is_empty());
        assert!(record.stages.meetings.is_none());
    }

    #[tokio::test]
    async fn no_meetings_is_informational_not_fatal() {
        let calendar = FakeCalendarSource::with_events(vec![]);
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync", "Active", 8.0, 0.0)]);
        let (o, _) = orchestrator(calendar, store, OrchestratorConfig::default());

        let record = o.run(request()).await;
        assert!(record.success);
        assert!(record.errors.iter().any(|e| e.contains("no meetings")));
        assert_eq!(record.summary.work_items_updated, 0);
    }

    #[tokio::test]
    async fn cancellation_truncates_the_run() {
        let calendar = FakeCalendarSource::with_events(vec![event(
            "ev1",
            "#42 Sync",
            "2025-03-10T14:00:00Z",
            "2025-03-10T15:00:00Z",
        )]);
        let store = FakeWorkItemStore::with_items(vec![item(42, "Sync", "Active", 8.0, 0.0)]);
        let store = Arc::new(store);
        let cancel = CancellationToken::new();
        let o = Orchestrator::new(
            Arc::new(calendar),
            store.clone(),
            None,
            OrchestratorConfig::default(),
            cancel.clone(),
        );

        cancel.cancel();
        let record = o.run(request()).await;
        assert!(!record.success);
        assert!(record.errors.iter().any(|e| e.contains("cancelled")));
        assert!(store.update_calls().is_empty());
    }

    #[tokio::test]
    async fn second_run_is_all_noops() {
        // Idempotence: running twice must leave the same value and report
        // only no-ops the second time.
        let make_calendar = || {
            FakeCalendarSource::with_events(vec![event(
                "ev1",
                "#42 Sync",
                "2025-03-10T14:00:00Z",
                "2025-03-10T15:00:00Z",
            )])
        };
        let store = Arc::new(FakeWorkItemStore::with_items(vec![item(
            42, "Sync", "Active", 8.0, 0.0,
        )]));

        let o1 = Orchestrator::new(
            Arc::new(make_calendar()),
            store.clone(),
            None,
            OrchestratorConfig::default(),
            CancellationToken::new(),
        );
        let first = o1.run(request()).await;
        assert_eq!(first.summary.work_items_updated, 1);
        assert_eq!(store.completed_work(42), Some(1.0));

        // Fresh orchestrator: empty audit/conflict logs, same inputs. The
        // stored value now matches the proposal, which detection reports as
        // a manual-update-free mismatch resolved by writing nothing new.
        let o2 = Orchestrator::new(
            Arc::new(make_calendar()),
            store.clone(),
            None,
            OrchestratorConfig {
                conflict_strategy: ConflictStrategy::Override,
                ..Default::default()
            },
            CancellationToken::new(),
        );
        let second = o2.run(request()).await;
        assert!(second.success);
        assert_eq!(store.completed_work(42), Some(1.0));
        assert_eq!(second.summary.work_items_updated, 0);
        assert_eq!(second.summary.work_items_skipped, 1);
    }

    #[tokio::test]
    async fn execution_log_keeps_records() {
        let calendar = FakeCalendarSource::with_events(vec![]);
        let store = FakeWorkItemStore::with_items(vec![item(1, "x", "Active", 1.0, 0.0)]);
        let (o, _) = orchestrator(calendar, store, OrchestratorConfig::default());

        assert!(o.last_execution().is_none());
        o.run(request()).await;
        o.run(request()).await;
        assert_eq!(o.execution_log().len(), 2);
        assert!(o.last_execution().is_some());
    }

    #[test]
    fn comparison_inputs_group_by_work_item() {
        let tz: Tz = "UTC".parse().unwrap();
        let mk = |id: i64, title: &str, hours: f64| MeetingMatch {
            meeting: tb_domain::meeting::Meeting {
                id: format!("m{id}-{hours}"),
                subject: "s".into(),
                start: tz.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                end: tz.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap(),
                duration_hours: hours,
                date: "2025-03-10".parse().unwrap(),
                attendees: vec![],
                organizer: String::new(),
                is_cancelled: false,
                is_online: false,
            },
            work_item_id: id,
            work_item_title: title.into(),
            duration_hours: hours,
        };
        let outcome = MatchOutcome {
            matched: vec![mk(1, "uno", 1.0), mk(1, "uno", 2.0), mk(2, "dos", 0.5)],
            unmatched: vec![],
            total_meetings: 3,
            match_rate: 1.0,
        };
        let items = vec![
            item(1, "uno", "Active", 8.0, 0.0),
            item(2, "dos", "Active", 4.0, 0.0),
        ];

        let inputs = build_comparison_inputs(&outcome, &items);
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].work_item_id, 1);
        assert_eq!(inputs[0].actual_hours, 3.0);
        assert_eq!(inputs[0].meeting_hours, Some(3.0));
        assert_eq!(inputs[0].estimated_hours, 8.0);
        assert_eq!(inputs[1].actual_hours, 0.5);
    }
}
