//! Meeting normalisation and aggregation.
//!
//! Turns raw calendar events into [`Meeting`] records in the configured
//! zone, then offers the day/week/user aggregations and filters the rest
//! of the pipeline and the reports build on. Malformed events are skipped
//! with one warning each; the stage itself never fails.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use tb_clients::calendar::{meeting_attendees, RawEvent};
use tb_domain::error::{Error, Result};
use tb_domain::meeting::{round2, Meeting, MeetingSummary};

/// Normalises raw events into domain meetings for one configured zone.
pub struct MeetingNormalizer {
    tz: Tz,
}

/// Aggregate bucket shared by the day/week/user groupings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeriodAggregate {
    pub total_hours: f64,
    pub meeting_count: usize,
    pub meetings: Vec<MeetingRef>,
}

/// Lightweight reference to a meeting inside an aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingRef {
    pub id: String,
    pub subject: String,
    pub duration_hours: f64,
    pub date: NaiveDate,
}

impl MeetingNormalizer {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    // ── Normalisation ────────────────────────────────────────────────

    /// Normalise a batch of events, skipping malformed ones.
    pub fn normalize(&self, events: &[RawEvent]) -> Vec<Meeting> {
        let mut meetings = Vec::with_capacity(events.len());
        for event in events {
            match self.normalize_event(event) {
                Ok(meeting) => meetings.push(meeting),
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "skipping malformed event");
                }
            }
        }
        tracing::info!(
            normalized = meetings.len(),
            total = events.len(),
            "events normalized"
        );
        meetings
    }

    /// Normalise one event or explain why it cannot be used.
    pub fn normalize_event(&self, event: &RawEvent) -> Result<Meeting> {
        let start_raw = event
            .start
            .as_ref()
            .map(|t| t.date_time.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MissingField("event missing start time".into()))?;
        let end_raw = event
            .end
            .as_ref()
            .map(|t| t.date_time.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::MissingField("event missing end time".into()))?;

        let start = self.parse_datetime(start_raw)?;
        let end = self.parse_datetime(end_raw)?;

        if end <= start {
            return Err(Error::InvalidInput(format!(
                "event ends at or before it starts ({start_raw} .. {end_raw})"
            )));
        }

        let duration_hours = (end - start).num_seconds() as f64 / 3600.0;

        let organizer = event
            .organizer
            .as_ref()
            .and_then(|o| o.email_address.as_ref())
            .map(|e| e.address.to_lowercase())
            .unwrap_or_default();

        Ok(Meeting {
            id: event.id.clone(),
            subject: event.subject.clone().unwrap_or_else(|| "No Subject".into()),
            start,
            end,
            duration_hours,
            date: start.date_naive(),
            attendees: meeting_attendees(event),
            organizer,
            is_cancelled: event.is_cancelled,
            is_online: event.is_online_meeting,
        })
    }

    /// Parse an ISO-8601 instant and convert to the configured zone.
    ///
    /// A trailing `Z` or explicit offset is honoured; naive datetimes are
    /// assumed UTC.
    fn parse_datetime(&self, raw: &str) -> Result<DateTime<Tz>> {
        let utc: DateTime<Utc> = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            dt.with_timezone(&Utc)
        } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            Utc.from_utc_datetime(&naive)
        } else {
            return Err(Error::InvalidInput(format!("unparseable datetime '{raw}'")));
        };
        Ok(utc.with_timezone(&self.tz))
    }

    // ── Aggregations (cancelled meetings excluded) ───────────────────

    /// Group by local ISO date.
    pub fn aggregate_by_day(&self, meetings: &[Meeting]) -> BTreeMap<String, PeriodAggregate> {
        self.aggregate_by_key(meetings, |m| vec![m.date.to_string()])
    }

    /// Group by ISO year-week (`YYYY-Www`).
    pub fn aggregate_by_week(&self, meetings: &[Meeting]) -> BTreeMap<String, PeriodAggregate> {
        self.aggregate_by_key(meetings, |m| {
            let week = m.date.iso_week();
            vec![format!("{}-W{:02}", week.year(), week.week())]
        })
    }

    /// Group by attendee; a meeting contributes to every attendee's total.
    pub fn aggregate_by_user(&self, meetings: &[Meeting]) -> BTreeMap<String, PeriodAggregate> {
        self.aggregate_by_key(meetings, |m| m.attendees.clone())
    }

    fn aggregate_by_key(
        &self,
        meetings: &[Meeting],
        keys: impl Fn(&Meeting) -> Vec<String>,
    ) -> BTreeMap<String, PeriodAggregate> {
        let mut buckets: BTreeMap<String, PeriodAggregate> = BTreeMap::new();
        for meeting in meetings {
            if meeting.is_cancelled {
                continue;
            }
            for key in keys(meeting) {
                let bucket = buckets.entry(key).or_default();
                bucket.total_hours += meeting.duration_hours;
                bucket.meeting_count += 1;
                bucket.meetings.push(MeetingRef {
                    id: meeting.id.clone(),
                    subject: meeting.subject.clone(),
                    duration_hours: meeting.display_hours(),
                    date: meeting.date,
                });
            }
        }
        for bucket in buckets.values_mut() {
            bucket.total_hours = round2(bucket.total_hours);
        }
        buckets
    }

    // ── Filters ──────────────────────────────────────────────────────

    /// Keep meetings whose local date falls in `[start, end]` (inclusive).
    pub fn filter_by_date_range(
        &self,
        meetings: &[Meeting],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<Meeting> {
        meetings
            .iter()
            .filter(|m| m.date >= start && m.date <= end)
            .cloned()
            .collect()
    }

    /// Keep meetings where the given address attends (case-insensitive).
    pub fn filter_by_attendee(&self, meetings: &[Meeting], email: &str) -> Vec<Meeting> {
        meetings
            .iter()
            .filter(|m| m.has_attendee(email))
            .cloned()
            .collect()
    }

    // ── Summary ──────────────────────────────────────────────────────

    pub fn summary(&self, meetings: &[Meeting]) -> MeetingSummary {
        let active: Vec<&Meeting> = meetings.iter().filter(|m| !m.is_cancelled).collect();
        let total_hours: f64 = active.iter().map(|m| m.duration_hours).sum();
        let average = if active.is_empty() {
            0.0
        } else {
            total_hours / active.len() as f64
        };

        MeetingSummary {
            total_meetings: meetings.len(),
            active_meetings: active.len(),
            total_hours: round2(total_hours),
            average_duration: round2(average),
            cancelled_count: meetings.iter().filter(|m| m.is_cancelled).count(),
            online_count: meetings.iter().filter(|m| m.is_online).count(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
