//! Manual time entries.
//!
//! Out-of-band hours (work done outside meetings) recorded by operators
//! and persisted by the tracker store. Validation lives here so the CLI
//! and CSV import share one rule set.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on hours for one entry (one day of work).
pub const MAX_ENTRY_HOURS: f64 = 24.0;

/// A manual time entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub entry_id: String,
    pub work_item_id: i64,
    pub hours: f64,
    pub date: NaiveDate,
    pub description: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

impl TimeEntry {
    /// Build a validated entry with a fresh ID and creation timestamp.
    pub fn new(
        work_item_id: i64,
        hours: f64,
        date: NaiveDate,
        description: &str,
        user_id: &str,
    ) -> Result<Self> {
        let entry = Self {
            entry_id: format!("ENTRY-{}", uuid::Uuid::new_v4().simple()),
            work_item_id,
            hours,
            date,
            description: description.trim().to_string(),
            user_id: user_id.trim().to_string(),
            created_at: Utc::now(),
            synced: false,
            synced_at: None,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check the entry against the store's validation rules.
    pub fn validate(&self) -> Result<()> {
        if self.hours <= 0.0 {
            return Err(Error::OutOfRange("hours must be positive".into()));
        }
        if self.hours > MAX_ENTRY_HOURS {
            return Err(Error::OutOfRange(format!(
                "hours cannot exceed {MAX_ENTRY_HOURS} per entry (got {})",
                self.hours
            )));
        }
        if self.work_item_id <= 0 {
            return Err(Error::InvalidInput(format!(
                "invalid work item ID {}",
                self.work_item_id
            )));
        }
        if self.description.trim().is_empty() {
            return Err(Error::MissingField("description is required".into()));
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::MissingField("user_id is required".into()));
        }
        Ok(())
    }

    /// Flag the entry as pushed to the work-item store.
    pub fn mark_synced(&mut self) {
        self.synced = true;
        self.synced_at = Some(Utc::now());
    }
}

/// Filter over stored entries; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub work_item_id: Option<i64>,
    pub user_id: Option<String>,
    /// Inclusive.
    pub start_date: Option<NaiveDate>,
    /// Inclusive.
    pub end_date: Option<NaiveDate>,
    pub synced: Option<bool>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &TimeEntry) -> bool {
        if let Some(id) = self.work_item_id {
            if entry.work_item_id != id {
                return false;
            }
        }
        if let Some(ref user) = self.user_id {
            if !entry.user_id.eq_ignore_ascii_case(user) {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if entry.date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.date > end {
                return false;
            }
        }
        if let Some(synced) = self.synced {
            if entry.synced != synced {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn new_entry_is_validated() {
        let e = TimeEntry::new(42, 2.5, date("2025-03-10"), "  revisión de PR ", "ana").unwrap();
        assert_eq!(e.description, "revisión de PR");
        assert!(!e.synced);
        assert!(e.entry_id.starts_with("ENTRY-"));
    }

    #[test]
    fn hours_boundaries() {
        assert!(TimeEntry::new(1, 0.0, date("2025-03-10"), "d", "u").is_err());
        assert!(TimeEntry::new(1, 24.0, date("2025-03-10"), "d", "u").is_ok());
        assert!(TimeEntry::new(1, 24.01, date("2025-03-10"), "d", "u").is_err());
    }

    #[test]
    fn rejects_bad_fields() {
        assert!(TimeEntry::new(0, 1.0, date("2025-03-10"), "d", "u").is_err());
        assert!(TimeEntry::new(1, 1.0, date("2025-03-10"), "   ", "u").is_err());
        assert!(TimeEntry::new(1, 1.0, date("2025-03-10"), "d", "").is_err());
    }

    #[test]
    fn mark_synced_sets_timestamp() {
        let mut e = TimeEntry::new(1, 1.0, date("2025-03-10"), "d", "u").unwrap();
        e.mark_synced();
        assert!(e.synced);
        assert!(e.synced_at.is_some());
    }

    #[test]
    fn filter_matching() {
        let e = TimeEntry::new(42, 2.0, date("2025-03-10"), "d", "Ana").unwrap();

        assert!(EntryFilter::default().matches(&e));
        assert!(EntryFilter {
            work_item_id: Some(42),
            user_id: Some("ana".into()),
            ..Default::default()
        }
        .matches(&e));
        assert!(!EntryFilter {
            work_item_id: Some(7),
            ..Default::default()
        }
        .matches(&e));
        assert!(EntryFilter {
            start_date: Some(date("2025-03-10")),
            end_date: Some(date("2025-03-10")),
            ..Default::default()
        }
        .matches(&e));
        assert!(!EntryFilter {
            end_date: Some(date("2025-03-09")),
            ..Default::default()
        }
        .matches(&e));
        assert!(!EntryFilter {
            synced: Some(true),
            ..Default::default()
        }
        .matches(&e));
    }

    #[test]
    fn entry_json_roundtrip() {
        let e = TimeEntry::new(42, 2.0, date("2025-03-10"), "d", "ana").unwrap();
        let json = serde_json::to_string(&e).unwrap();
        let back: TimeEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
