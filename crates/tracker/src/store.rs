//! Durable manual-entry store.
//!
//! A JSON file holding the full entry list; every mutation serialises the
//! list back to disk atomically (write-temp-then-rename). There is a
//! single writer per store instance.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tb_domain::entry::{EntryFilter, TimeEntry};
use tb_domain::error::{Error, Result};

/// On-disk form of the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    last_updated: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    entries: Vec<TimeEntry>,
}

/// Per-bucket figures inside an [`EntrySummary`].
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct BucketTotals {
    pub count: usize,
    pub hours: f64,
}

/// Summary statistics over a filtered entry set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EntrySummary {
    pub total_entries: usize,
    pub total_hours: f64,
    pub synced_entries: usize,
    pub unsynced_entries: usize,
    pub by_work_item: BTreeMap<i64, BucketTotals>,
    pub by_user: BTreeMap<String, BucketTotals>,
}

/// File-backed list of manual time entries.
pub struct ManualEntryStore {
    path: PathBuf,
    entries: RwLock<Vec<TimeEntry>>,
}

impl ManualEntryStore {
    /// Load the store at `path`, creating parent directories. A missing
    /// file is an empty store; a malformed one is an error.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let file: StoreFile = serde_json::from_str(&raw)
                .map_err(|e| Error::CorruptStore(format!("{}: {e}", path.display())))?;

            let mut seen = std::collections::HashSet::new();
            for entry in &file.entries {
                if !seen.insert(entry.entry_id.clone()) {
                    return Err(Error::CorruptStore(format!(
                        "duplicate entry ID '{}' in {}",
                        entry.entry_id,
                        path.display()
                    )));
                }
            }
            file.entries
        } else {
            Vec::new()
        };

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            "manual entry store loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Validate and add a new entry.
    pub fn add_entry(
        &self,
        work_item_id: i64,
        hours: f64,
        date: NaiveDate,
        description: &str,
        user_id: &str,
    ) -> Result<TimeEntry> {
        let entry = TimeEntry::new(work_item_id, hours, date, description, user_id)?;
        self.insert(entry.clone())?;
        tracing::info!(entry_id = %entry.entry_id, work_item_id, hours, "entry added");
        Ok(entry)
    }

    /// Insert a pre-built entry (CSV import path: IDs and timestamps are
    /// preserved from the file).
    pub fn insert(&self, entry: TimeEntry) -> Result<()> {
        entry.validate()?;
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.entry_id == entry.entry_id) {
            return Err(Error::DuplicateEntry(entry.entry_id));
        }
        entries.push(entry);
        self.persist(&entries)
    }

    /// Mark one entry as synced to the work-item store.
    pub fn mark_synced(&self, entry_id: &str) -> Result<TimeEntry> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| Error::NotFound(format!("entry {entry_id}")))?;
        entry.mark_synced();
        let updated = entry.clone();
        self.persist(&entries)?;
        tracing::info!(entry_id, "entry marked as synced");
        Ok(updated)
    }

    pub fn delete(&self, entry_id: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.entry_id != entry_id);
        if entries.len() == before {
            return Err(Error::NotFound(format!("entry {entry_id}")));
        }
        self.persist(&entries)?;
        tracing::info!(entry_id, "entry deleted");
        Ok(())
    }

    /// Remove every synced entry; returns how many were dropped.
    pub fn clear_synced(&self) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !e.synced);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        tracing::info!(removed, "synced entries cleared");
        Ok(removed)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Entries matching the filter, in insertion order.
    pub fn entries(&self, filter: &EntryFilter) -> Vec<TimeEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn unsynced(&self) -> Vec<TimeEntry> {
        self.entries(&EntryFilter {
            synced: Some(false),
            ..Default::default()
        })
    }

    pub fn summary(&self, filter: &EntryFilter) -> EntrySummary {
        let entries = self.entries(filter);
        let mut summary = EntrySummary {
            total_entries: entries.len(),
            ..Default::default()
        };

        for entry in &entries {
            summary.total_hours += entry.hours;
            if entry.synced {
                summary.synced_entries += 1;
            } else {
                summary.unsynced_entries += 1;
            }

            let wi = summary.by_work_item.entry(entry.work_item_id).or_default();
            wi.count += 1;
            wi.hours += entry.hours;

            let user = summary.by_user.entry(entry.user_id.clone()).or_default();
            user.count += 1;
            user.hours += entry.hours;
        }
        summary
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Serialise the full list atomically: write a temp file in the same
    /// directory, then rename over the store path.
    fn persist(&self, entries: &[TimeEntry]) -> Result<()> {
        let file = StoreFile {
            last_updated: Some(Utc::now()),
            entries: entries.to_vec(),
        };
        let rendered = serde_json::to_string_pretty(&file)?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), rendered)?;
        tmp.persist(&self.path)
            .map_err(|e| Error::Io(e.error))?;

        tracing::debug!(entries = entries.len(), "store persisted");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
