//! Meeting → work-item matching.
//!
//! Strategies are applied in order and the first to produce a match wins:
//! custom rules, work-item ID in the subject, subject/title similarity,
//! then attendee ↔ assignee. Cancelled meetings are never matched and an
//! unmatched meeting is reported, not an error.

use regex::Regex;
use serde::Serialize;

use tb_domain::error::{Error, Result};
use tb_domain::meeting::{round2, Meeting};
use tb_domain::work_item::WorkItem;

/// Minimum similarity ratio for the fuzzy subject strategy.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.6;

/// Subject patterns that may carry a work-item ID, in priority order.
const ID_PATTERNS: [&str; 5] = [
    r"#(\d+)",
    r"WI[-\s]?(\d+)",
    r"Task[-\s]?(\d+)",
    r"\[(\d+)\]",
    r"(?:^|\s)(\d{3,})",
];

/// A custom matching rule: first pattern matching the subject wins.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub name: Option<String>,
    pub pattern: String,
    pub work_item_id: i64,
}

/// One matched meeting/work-item pair.
#[derive(Debug, Clone)]
pub struct MeetingMatch {
    pub meeting: Meeting,
    pub work_item_id: i64,
    pub work_item_title: String,
    pub duration_hours: f64,
}

/// Outcome of matching one batch of meetings.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matched: Vec<MeetingMatch>,
    pub unmatched: Vec<Meeting>,
    pub total_meetings: usize,
    pub match_rate: f64,
}

/// Aggregate view over the meetings nothing claimed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnmatchedSummary {
    pub count: usize,
    pub total_hours: f64,
    pub unique_subjects: Vec<String>,
}

/// Matches meetings to work items.
pub struct MeetingMatcher {
    min_similarity: f64,
    id_patterns: Vec<Regex>,
    rules: Vec<(Regex, MatchRule)>,
}

impl MeetingMatcher {
    pub fn new(min_similarity: f64) -> Self {
        let id_patterns = ID_PATTERNS
            .iter()
            .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern compiles"))
            .collect();
        Self {
            min_similarity,
            id_patterns,
            rules: Vec::new(),
        }
    }

    /// Install custom rules evaluated before every other strategy.
    pub fn with_rules(mut self, rules: Vec<MatchRule>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&format!("(?i){}", rule.pattern)).map_err(|e| {
                Error::InvalidInput(format!("bad matching rule '{}': {e}", rule.pattern))
            })?;
            compiled.push((regex, rule));
        }
        self.rules = compiled;
        Ok(self)
    }

    // ── Single meeting ───────────────────────────────────────────────

    /// Find the work item a meeting belongs to, if any.
    pub fn match_meeting<'a>(
        &self,
        meeting: &Meeting,
        work_items: &'a [WorkItem],
    ) -> Option<&'a WorkItem> {
        if work_items.is_empty() || meeting.is_cancelled {
            return None;
        }

        if let Some(item) = self.match_by_rules(meeting, work_items) {
            tracing::info!(
                meeting = %meeting.subject, work_item_id = item.id,
                "matched by custom rule"
            );
            return Some(item);
        }

        if let Some(item) = self.match_by_id_in_subject(meeting, work_items) {
            tracing::info!(
                meeting = %meeting.subject, work_item_id = item.id,
                "matched by ID in subject"
            );
            return Some(item);
        }

        let (best, score) = self.match_by_similarity(meeting, work_items);
        if let Some(item) = best {
            if score >= self.min_similarity {
                tracing::info!(
                    meeting = %meeting.subject, work_item_id = item.id, score,
                    "matched by subject similarity"
                );
                return Some(item);
            }
        }

        if let Some(item) = self.match_by_attendees(meeting, work_items) {
            tracing::info!(
                meeting = %meeting.subject, work_item_id = item.id,
                "matched by attendee assignment"
            );
            return Some(item);
        }

        tracing::debug!(meeting = %meeting.subject, "no match found");
        None
    }

    fn match_by_rules<'a>(
        &self,
        meeting: &Meeting,
        work_items: &'a [WorkItem],
    ) -> Option<&'a WorkItem> {
        for (regex, rule) in &self.rules {
            if regex.is_match(&meeting.subject) {
                if let Some(item) = work_items.iter().find(|w| w.id == rule.work_item_id) {
                    return Some(item);
                }
            }
        }
        None
    }

    /// Strategy 1: scan the subject for an ID that exists in the candidate
    /// set. A captured ID that is not a candidate falls through to the next
    /// pattern.
    fn match_by_id_in_subject<'a>(
        &self,
        meeting: &Meeting,
        work_items: &'a [WorkItem],
    ) -> Option<&'a WorkItem> {
        for pattern in &self.id_patterns {
            if let Some(caps) = pattern.captures(&meeting.subject) {
                if let Ok(id) = caps[1].parse::<i64>() {
                    if let Some(item) = work_items.iter().find(|w| w.id == id) {
                        return Some(item);
                    }
                }
            }
        }
        None
    }

    /// Strategy 2: best character-based similarity between subject and title.
    fn match_by_similarity<'a>(
        &self,
        meeting: &Meeting,
        work_items: &'a [WorkItem],
    ) -> (Option<&'a WorkItem>, f64) {
        let subject = meeting.subject.to_lowercase();
        if subject.is_empty() {
            return (None, 0.0);
        }

        let mut best: Option<&WorkItem> = None;
        let mut best_score = 0.0;
        for item in work_items {
            let title = item.title.to_lowercase();
            if title.is_empty() {
                continue;
            }
            let score = strsim::normalized_levenshtein(&subject, &title);
            if score > best_score {
                best_score = score;
                best = Some(item);
            }
        }
        (best, best_score)
    }

    /// Strategy 3: first candidate assigned to one of the attendees.
    fn match_by_attendees<'a>(
        &self,
        meeting: &Meeting,
        work_items: &'a [WorkItem],
    ) -> Option<&'a WorkItem> {
        if meeting.attendees.is_empty() {
            return None;
        }
        work_items.iter().find(|item| {
            item.assigned_to
                .as_deref()
                .is_some_and(|assignee| meeting.has_attendee(assignee))
        })
    }

    // ── Batch ────────────────────────────────────────────────────────

    /// Match a batch; cancelled meetings are dropped silently.
    pub fn match_batch(&self, meetings: &[Meeting], work_items: &[WorkItem]) -> MatchOutcome {
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();

        for meeting in meetings {
            if meeting.is_cancelled {
                continue;
            }
            match self.match_meeting(meeting, work_items) {
                Some(item) => matched.push(MeetingMatch {
                    meeting: meeting.clone(),
                    work_item_id: item.id,
                    work_item_title: item.title.clone(),
                    duration_hours: meeting.duration_hours,
                }),
                None => unmatched.push(meeting.clone()),
            }
        }

        let match_rate = if meetings.is_empty() {
            0.0
        } else {
            matched.len() as f64 / meetings.len() as f64
        };

        tracing::info!(
            matched = matched.len(),
            unmatched = unmatched.len(),
            "batch matching complete"
        );

        MatchOutcome {
            matched,
            unmatched,
            total_meetings: meetings.len(),
            match_rate,
        }
    }

    /// Summary of meetings nothing claimed, for reports.
    pub fn unmatched_summary(unmatched: &[Meeting]) -> UnmatchedSummary {
        let total_hours: f64 = unmatched.iter().map(|m| m.duration_hours).sum();
        let mut unique_subjects: Vec<String> = Vec::new();
        for meeting in unmatched {
            if !unique_subjects.contains(&meeting.subject) {
                unique_subjects.push(meeting.subject.clone());
            }
        }
        UnmatchedSummary {
            count: unmatched.len(),
            total_hours: round2(total_hours),
            unique_subjects,
        }
    }
}

impl Default for MeetingMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SIMILARITY)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use tb_domain::work_item::SchedulingFields;

    fn meeting(subject: &str, attendees: &[&str]) -> Meeting {
        let tz: Tz = "America/Bogota".parse().unwrap();
        let start = tz.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let end = tz.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        Meeting {
            id: "m1".into(),
            subject: subject.into(),
            start,
            end,
            duration_hours: 1.0,
            date: start.date_naive(),
            attendees: attendees.iter().map(|s| s.to_string()).collect(),
            organizer: String::new(),
            is_cancelled: false,
            is_online: true,
        }
    }

    fn item(id: i64, title: &str, assigned_to: Option<&str>) -> WorkItem {
        WorkItem {
            id,
            title: title.into(),
            state: "Active".into(),
            assigned_to: assigned_to.map(|s| s.to_string()),
            work_item_type: "Task".into(),
            scheduling: SchedulingFields::default(),
        }
    }

    #[test]
    fn id_patterns_in_subject() {
        let matcher = MeetingMatcher::default();
        let items = vec![item(123, "totally unrelated", None)];

        for subject in [
            "#123 Sync",
            "WI-123 review",
            "wi 123 review",
            "Task 123 kickoff",
            "Task-123 kickoff",
            "[123] Review",
            "Planning 123 retro",
        ] {
            let found = matcher.match_meeting(&meeting(subject, &[]), &items);
            assert_eq!(found.map(|w| w.id), Some(123), "subject: {subject}");
        }
    }

    #[test]
    fn id_match_wins_over_similarity() {
        // E6: ID 123 in subject beats any similarity with candidate 456.
        let matcher = MeetingMatcher::default();
        let items = vec![
            item(123, "totally unrelated title", None),
            item(456, "[123] Review", None),
        ];
        let found = matcher.match_meeting(&meeting("[123] Review", &[]), &items);
        assert_eq!(found.map(|w| w.id), Some(123));
    }

    #[test]
    fn captured_id_outside_candidates_falls_through() {
        let matcher = MeetingMatcher::default();
        // Subject carries #999 which is no candidate; the similarity
        // strategy should still win on the near-identical title.
        let items = vec![item(5, "quarterly planning session", None)];
        let found =
            matcher.match_meeting(&meeting("#999 quarterly planning session", &[]), &items);
        assert_eq!(found.map(|w| w.id), Some(5));
    }

    #[test]
    fn similarity_requires_threshold() {
        let matcher = MeetingMatcher::default();
        let items = vec![item(7, "deploy pipeline hardening", None)];

        // Exact title (case-insensitive) clears 0.6 easily.
        let found = matcher.match_meeting(&meeting("Deploy Pipeline Hardening", &[]), &items);
        assert_eq!(found.map(|w| w.id), Some(7));

        // Entirely different subject stays unmatched.
        let found = matcher.match_meeting(&meeting("zzzz", &[]), &items);
        assert!(found.is_none());
    }

    #[test]
    fn attendee_strategy_matches_assignee() {
        let matcher = MeetingMatcher::default();
        let items = vec![
            item(1, "x", Some("luis@contoso.com")),
            item(2, "y", Some("ana@contoso.com")),
        ];
        let found = matcher.match_meeting(&meeting("zzzz", &["ana@contoso.com"]), &items);
        assert_eq!(found.map(|w| w.id), Some(2));
    }

    #[test]
    fn cancelled_meetings_never_match() {
        let matcher = MeetingMatcher::default();
        let items = vec![item(123, "x", None)];
        let mut m = meeting("#123 Sync", &[]);
        m.is_cancelled = true;
        assert!(matcher.match_meeting(&m, &items).is_none());

        let outcome = matcher.match_batch(&[m], &items);
        assert!(outcome.matched.is_empty());
        assert!(outcome.unmatched.is_empty());
    }

    #[test]
    fn custom_rule_takes_precedence() {
        let matcher = MeetingMatcher::default()
            .with_rules(vec![MatchRule {
                name: Some("standup".into()),
                pattern: "daily standup".into(),
                work_item_id: 77,
            }])
            .unwrap();
        let items = vec![item(77, "unrelated", None), item(123, "x", None)];
        let found = matcher.match_meeting(&meeting("Daily Standup #123", &[]), &items);
        assert_eq!(found.map(|w| w.id), Some(77));
    }

    #[test]
    fn bad_rule_pattern_is_rejected() {
        let result = MeetingMatcher::default().with_rules(vec![MatchRule {
            name: None,
            pattern: "([".into(),
            work_item_id: 1,
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn batch_outcome_counts() {
        let matcher = MeetingMatcher::default();
        let items = vec![item(123, "x", None)];
        let meetings = vec![meeting("#123 Sync", &[]), meeting("zzzz", &[])];
        let outcome = matcher.match_batch(&meetings, &items);

        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.unmatched.len(), 1);
        assert_eq!(outcome.total_meetings, 2);
        assert_eq!(outcome.match_rate, 0.5);
        assert!(!outcome.matched[0].meeting.is_cancelled);
        assert_eq!(outcome.matched[0].duration_hours, 1.0);
    }

    #[test]
    fn unmatched_summary_deduplicates_subjects() {
        let unmatched = vec![meeting("repetida", &[]), meeting("repetida", &[])];
        let summary = MeetingMatcher::unmatched_summary(&unmatched);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.total_hours, 2.0);
        assert_eq!(summary.unique_subjects, vec!["repetida"]);
    }
}
