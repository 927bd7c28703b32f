//! Work-item records as fetched from the store.
//!
//! Items are fetched fresh per run and never cached across runs.

use serde::{Deserialize, Serialize};

/// States that permanently end a work item's lifecycle.
pub const TERMINAL_STATES: [&str; 3] = ["Removed", "Closed", "Deleted"];

/// States in which a work item rejects writes outright.
pub const LOCKED_STATES: [&str; 2] = ["Removed", "Deleted"];

/// A unit of tracked effort in the external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Globally unique integer ID.
    pub id: i64,
    pub title: String,
    pub state: String,
    /// Assignee address when set (`uniqueName` on the wire).
    pub assigned_to: Option<String>,
    pub work_item_type: String,
    #[serde(default)]
    pub scheduling: SchedulingFields,
}

/// The scheduling triple, in hours. Missing wire values default to 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingFields {
    #[serde(default)]
    pub original_estimate: f64,
    #[serde(default)]
    pub completed_work: f64,
    #[serde(default)]
    pub remaining_work: f64,
}

impl WorkItem {
    /// Whether the state permanently ends the item's lifecycle.
    pub fn is_terminal(&self) -> bool {
        TERMINAL_STATES.contains(&self.state.as_str())
    }

    /// Whether the state rejects writes outright.
    pub fn is_locked(&self) -> bool {
        LOCKED_STATES.contains(&self.state.as_str())
    }

    /// Case-insensitive assignee comparison.
    pub fn is_assigned_to(&self, email: &str) -> bool {
        self.assigned_to
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case(email))
    }
}
