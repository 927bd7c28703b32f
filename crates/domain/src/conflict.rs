//! Conflict taxonomy and resolution records.
//!
//! A [`ConflictReport`] describes every precondition that makes a naive
//! write unsafe for one work item; a [`Resolution`] records what the
//! configured strategy decided to do about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conflicts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The stored value changed since the last sync.
    ManualUpdate,
    /// The item already has completed work and we have no prior baseline.
    ValueMismatch,
    /// The proposed value far exceeds the original estimate.
    Overbudget,
    /// The item state rejects writes outright.
    WorkItemLocked,
    /// The principal lacks permission on this item.
    PermissionDenied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected conflict with the payload values relevant to its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Conflict {
    /// Bare conflict with no payload; builder-style setters fill the rest.
    pub fn new(kind: ConflictKind, severity: ConflictSeverity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            current_value: None,
            expected_value: None,
            proposed_value: None,
            estimate: None,
            variance_ratio: None,
            state: None,
        }
    }
}

/// Result of conflict detection for one prospective update.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictReport {
    pub work_item_id: i64,
    pub conflicts: Vec<Conflict>,
    pub current_hours: Option<f64>,
    pub proposed_hours: f64,
    pub last_known_hours: Option<f64>,
    pub can_proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn has_kind(&self, kind: ConflictKind) -> bool {
        self.conflicts.iter().any(|c| c.kind == kind)
    }

    /// Whether every conflict is of the given kind (and at least one exists).
    pub fn only_kind(&self, kind: ConflictKind) -> bool {
        self.has_conflicts() && self.conflicts.iter().all(|c| c.kind == kind)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategies and resolutions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Policy for resolving a conflict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Replace the stored value with the proposed one.
    Override,
    /// Add the proposed value to the stored one.
    Add,
    /// Keep the stored value; no write.
    #[default]
    Skip,
    /// Refuse to resolve; the item is reported as failed.
    Fail,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::Override => "override",
            ConflictStrategy::Add => "add",
            ConflictStrategy::Skip => "skip",
            ConflictStrategy::Fail => "fail",
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "override" => Ok(ConflictStrategy::Override),
            "add" => Ok(ConflictStrategy::Add),
            "skip" => Ok(ConflictStrategy::Skip),
            "fail" => Ok(ConflictStrategy::Fail),
            other => Err(crate::error::Error::InvalidInput(format!(
                "unknown conflict strategy '{other}' (expected override/add/skip/fail)"
            ))),
        }
    }
}

/// What a resolution actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    NoConflicts,
    Override,
    Add,
    Skip,
    Fail,
    Blocked,
}

/// Outcome of resolving one conflict report.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub work_item_id: i64,
    pub strategy: ConflictStrategy,
    pub resolved: bool,
    pub action_taken: ResolutionAction,
    pub final_value: Option<f64>,
    pub message: String,
    pub conflicts_resolved: Vec<ConflictKind>,
}

impl Resolution {
    /// Whether the orchestrator should pass this item to the writer.
    ///
    /// Skip keeps the stored value without a write; blocked and failed
    /// resolutions never reach the writer either.
    pub fn allows_write(&self) -> bool {
        self.resolved
            && matches!(
                self.action_taken,
                ResolutionAction::NoConflicts | ResolutionAction::Override | ResolutionAction::Add
            )
    }
}

/// One entry in the resolver's bounded in-memory log.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictLogEntry {
    pub timestamp: DateTime<Utc>,
    pub work_item_id: i64,
    pub kinds: Vec<ConflictKind>,
    pub strategy: ConflictStrategy,
    pub action_taken: ResolutionAction,
    pub resolved: bool,
    pub current_hours: Option<f64>,
    pub proposed_hours: f64,
    pub final_value: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(conflicts: Vec<Conflict>, can_proceed: bool) -> ConflictReport {
        ConflictReport {
            work_item_id: 1,
            conflicts,
            current_hours: Some(2.0),
            proposed_hours: 3.0,
            last_known_hours: None,
            can_proceed,
            error: None,
        }
    }

    #[test]
    fn kind_queries() {
        let r = report(
            vec![Conflict::new(
                ConflictKind::ValueMismatch,
                ConflictSeverity::Medium,
                "existing value",
            )],
            true,
        );
        assert!(r.has_conflicts());
        assert!(r.has_kind(ConflictKind::ValueMismatch));
        assert!(r.only_kind(ConflictKind::ValueMismatch));
        assert!(!r.has_kind(ConflictKind::Overbudget));
    }

    #[test]
    fn only_kind_requires_non_empty() {
        let r = report(vec![], true);
        assert!(!r.only_kind(ConflictKind::ValueMismatch));
    }

    #[test]
    fn strategy_parsing_roundtrip() {
        for s in ["override", "add", "skip", "fail"] {
            let parsed: ConflictStrategy = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("merge".parse::<ConflictStrategy>().is_err());
    }

    #[test]
    fn skip_resolution_never_writes() {
        let r = Resolution {
            work_item_id: 1,
            strategy: ConflictStrategy::Skip,
            resolved: true,
            action_taken: ResolutionAction::Skip,
            final_value: Some(2.0),
            message: String::new(),
            conflicts_resolved: vec![ConflictKind::ValueMismatch],
        };
        assert!(!r.allows_write());
    }

    #[test]
    fn override_resolution_writes() {
        let r = Resolution {
            work_item_id: 1,
            strategy: ConflictStrategy::Override,
            resolved: true,
            action_taken: ResolutionAction::Override,
            final_value: Some(3.0),
            message: String::new(),
            conflicts_resolved: vec![],
        };
        assert!(r.allows_write());
    }
}
