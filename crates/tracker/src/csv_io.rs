//! CSV import/export for the manual-entry store.
//!
//! Export writes all nine columns; import requires the five data-bearing
//! columns (`work_item_id, hours, date, description, user_id`) and
//! preserves IDs, creation timestamps, and sync state when the file
//! carries them. Row-level failures are collected, not fatal.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

use tb_domain::entry::{EntryFilter, TimeEntry};
use tb_domain::error::{Error, Result};

use crate::store::ManualEntryStore;

/// Export/import column set, in order.
pub const CSV_COLUMNS: [&str; 9] = [
    "entry_id",
    "work_item_id",
    "hours",
    "date",
    "description",
    "user_id",
    "created_at",
    "synced",
    "synced_at",
];

/// Columns an import file must carry.
const REQUIRED_COLUMNS: [&str; 5] = ["work_item_id", "hours", "date", "description", "user_id"];

/// Result of one CSV import.
#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub imported: Vec<TimeEntry>,
    /// One message per rejected row ("row N: reason").
    pub errors: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Import
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Import entries from `path` into the store.
pub fn import_csv(store: &ManualEntryStore, path: &Path) -> Result<ImportOutcome> {
    if !path.exists() {
        return Err(Error::NotFound(format!("CSV file {}", path.display())));
    }

    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("reading {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("reading CSV headers: {e}")))?
        .clone();
    let column = |name: &str| headers.iter().position(|h| h == name);

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|name| column(name).is_none())
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(Error::MissingField(format!(
            "CSV must have columns: {}",
            missing.join(", ")
        )));
    }

    let get = |record: &csv::StringRecord, name: &str| -> Option<String> {
        column(name)
            .and_then(|i| record.get(i))
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty())
    };

    let mut outcome = ImportOutcome::default();

    // Row 1 is the header.
    for (row, record) in reader.records().enumerate() {
        let row = row + 2;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                outcome.errors.push(format!("row {row}: {e}"));
                continue;
            }
        };

        match parse_row(&record, &get) {
            Ok(entry) => match store.insert(entry.clone()) {
                Ok(()) => outcome.imported.push(entry),
                Err(e) => outcome.errors.push(format!("row {row}: {e}")),
            },
            Err(e) => outcome.errors.push(format!("row {row}: {e}")),
        }
    }

    if outcome.errors.is_empty() {
        tracing::info!(imported = outcome.imported.len(), "CSV import complete");
    } else {
        tracing::warn!(
            imported = outcome.imported.len(),
            errors = outcome.errors.len(),
            "CSV import finished with rejected rows"
        );
    }
    Ok(outcome)
}

fn parse_row(
    record: &csv::StringRecord,
    get: &impl Fn(&csv::StringRecord, &str) -> Option<String>,
) -> Result<TimeEntry> {
    let work_item_id: i64 = get(record, "work_item_id")
        .ok_or_else(|| Error::MissingField("work_item_id".into()))?
        .parse()
        .map_err(|_| Error::InvalidInput("work_item_id must be an integer".into()))?;
    let hours: f64 = get(record, "hours")
        .ok_or_else(|| Error::MissingField("hours".into()))?
        .parse()
        .map_err(|_| Error::InvalidInput("hours must be a number".into()))?;
    let date: NaiveDate = get(record, "date")
        .ok_or_else(|| Error::MissingField("date".into()))?
        .parse()
        .map_err(|_| Error::InvalidInput("date must be YYYY-MM-DD".into()))?;
    let description =
        get(record, "description").ok_or_else(|| Error::MissingField("description".into()))?;
    let user_id = get(record, "user_id").ok_or_else(|| Error::MissingField("user_id".into()))?;

    let mut entry = TimeEntry::new(work_item_id, hours, date, &description, &user_id)?;

    // Preserve identity and history when the file carries them.
    if let Some(id) = get(record, "entry_id") {
        entry.entry_id = id;
    }
    if let Some(created) = get(record, "created_at") {
        entry.created_at = created
            .parse::<DateTime<Utc>>()
            .map_err(|_| Error::InvalidInput("created_at must be RFC 3339".into()))?;
    }
    if let Some(synced) = get(record, "synced") {
        entry.synced = synced.eq_ignore_ascii_case("true");
    }
    if let Some(synced_at) = get(record, "synced_at") {
        entry.synced_at = Some(
            synced_at
                .parse::<DateTime<Utc>>()
                .map_err(|_| Error::InvalidInput("synced_at must be RFC 3339".into()))?,
        );
    }
    Ok(entry)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Export filtered entries to `path`; returns how many rows were written.
pub fn export_csv(store: &ManualEntryStore, path: &Path, filter: &EntryFilter) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let entries = store.entries(filter);
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("writing {}: {e}", path.display())))?;

    writer
        .write_record(CSV_COLUMNS)
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    for entry in &entries {
        writer
            .write_record([
                entry.entry_id.clone(),
                entry.work_item_id.to_string(),
                entry.hours.to_string(),
                entry.date.to_string(),
                entry.description.clone(),
                entry.user_id.clone(),
                entry.created_at.to_rfc3339(),
                entry.synced.to_string(),
                entry
                    .synced_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ])
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    }
    writer
        .flush()
        .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

    tracing::info!(rows = entries.len(), path = %path.display(), "CSV export complete");
    Ok(entries.len())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
