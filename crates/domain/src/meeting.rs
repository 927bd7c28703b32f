//! Normalised meeting records.
//!
//! A [`Meeting`] is produced by the normaliser from a raw calendar event
//! and is immutable afterwards. Instants carry the configured zone;
//! `date` is the local calendar date of `start`.

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;

/// A calendar event normalised into the domain form.
#[derive(Debug, Clone)]
pub struct Meeting {
    /// Opaque ID, unique within a source.
    pub id: String,
    pub subject: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Full-precision duration; display rounds to 2 dp.
    pub duration_hours: f64,
    /// Local calendar date of `start` in the configured zone.
    pub date: NaiveDate,
    /// Unique, lowercased attendee addresses.
    pub attendees: Vec<String>,
    pub organizer: String,
    pub is_cancelled: bool,
    pub is_online: bool,
}

impl Meeting {
    /// Duration rounded to 2 decimal places for display.
    pub fn display_hours(&self) -> f64 {
        round2(self.duration_hours)
    }

    /// Case-insensitive attendee membership test.
    pub fn has_attendee(&self, email: &str) -> bool {
        let needle = email.to_lowercase();
        self.attendees.iter().any(|a| *a == needle)
    }
}

/// Round to 2 decimal places (aggregation/display edges only).
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Summary statistics over a set of meetings.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MeetingSummary {
    pub total_meetings: usize,
    pub active_meetings: usize,
    pub total_hours: f64,
    pub average_duration: f64,
    pub cancelled_count: usize,
    pub online_count: usize,
}
