//! Estimate-vs-actual comparison records.
//!
//! `variance_percentage` and `variance_ratio` use `f64::INFINITY` as the
//! zero-estimate sentinel; the serialiser writes it as the string `"inf"`
//! so JSON and CSV consumers see a stable token instead of `null`.

use serde::{Deserialize, Serialize, Serializer};

/// Categorical variance severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationLevel {
    None,
    Light,
    Moderate,
    High,
}

impl DeviationLevel {
    /// Ordering rank for severity comparisons (None < Light < Moderate < High).
    pub fn rank(self) -> u8 {
        match self {
            DeviationLevel::None => 0,
            DeviationLevel::Light => 1,
            DeviationLevel::Moderate => 2,
            DeviationLevel::High => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviationLevel::None => "none",
            DeviationLevel::Light => "light",
            DeviationLevel::Moderate => "moderate",
            DeviationLevel::High => "high",
        }
    }
}

/// Raw variance metrics between estimated and actual hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Variance {
    pub variance_absolute: f64,
    #[serde(serialize_with = "ser_sentinel")]
    pub variance_percentage: f64,
    #[serde(serialize_with = "ser_sentinel")]
    pub variance_ratio: f64,
    pub is_over_estimate: bool,
    pub is_under_estimate: bool,
}

/// The paired estimate-vs-actual record for one work item.
#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub work_item_id: i64,
    pub title: String,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    pub meeting_hours: Option<f64>,
    pub execution_hours: Option<f64>,
    pub variance_absolute: f64,
    #[serde(serialize_with = "ser_sentinel")]
    pub variance_percentage: f64,
    #[serde(serialize_with = "ser_sentinel")]
    pub variance_ratio: f64,
    pub is_over_estimate: bool,
    pub is_under_estimate: bool,
    pub deviation_level: DeviationLevel,
    pub deviation_description: String,
    pub is_acceptable: bool,
    pub recommendation: String,
}

/// Aggregate statistics over a batch of comparisons.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonStats {
    pub total_items: usize,
    pub total_estimated_hours: f64,
    pub total_actual_hours: f64,
    pub total_meeting_hours: f64,
    pub total_execution_hours: f64,
    pub overall_variance_absolute: f64,
    #[serde(serialize_with = "ser_sentinel")]
    pub overall_variance_percentage: f64,
    #[serde(serialize_with = "ser_sentinel")]
    pub overall_variance_ratio: f64,
    pub acceptable_count: usize,
    pub deviation_count: usize,
    pub by_level: LevelCounts,
    pub average_estimated: f64,
    pub average_actual: f64,
    /// Top items ranked by `|variance_percentage|`, largest first.
    pub top_deviations: Vec<Comparison>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub none: usize,
    pub light: usize,
    pub moderate: usize,
    pub high: usize,
}

impl LevelCounts {
    pub fn bump(&mut self, level: DeviationLevel) {
        match level {
            DeviationLevel::None => self.none += 1,
            DeviationLevel::Light => self.light += 1,
            DeviationLevel::Moderate => self.moderate += 1,
            DeviationLevel::High => self.high += 1,
        }
    }
}

/// Serialize a possibly-infinite metric; non-finite becomes `"inf"`.
pub fn ser_sentinel<S: Serializer>(v: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
    if v.is_finite() {
        s.serialize_f64(*v)
    } else {
        s.serialize_str("inf")
    }
}

/// Render a possibly-infinite metric for CSV cells and console output.
pub fn fmt_sentinel(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.2}")
    } else {
        "inf".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ranks_are_ordered() {
        assert!(DeviationLevel::None.rank() < DeviationLevel::Light.rank());
        assert!(DeviationLevel::Light.rank() < DeviationLevel::Moderate.rank());
        assert!(DeviationLevel::Moderate.rank() < DeviationLevel::High.rank());
    }

    #[test]
    fn sentinel_serializes_as_string() {
        let v = Variance {
            variance_absolute: 5.0,
            variance_percentage: f64::INFINITY,
            variance_ratio: f64::INFINITY,
            is_over_estimate: true,
            is_under_estimate: false,
        };
        let json = serde_json::to_value(v).unwrap();
        assert_eq!(json["variance_percentage"], "inf");
        assert_eq!(json["variance_ratio"], "inf");
        assert_eq!(json["variance_absolute"], 5.0);
    }

    #[test]
    fn sentinel_formatting() {
        assert_eq!(fmt_sentinel(12.3456), "12.35");
        assert_eq!(fmt_sentinel(f64::INFINITY), "inf");
    }

    #[test]
    fn level_serde_names() {
        let json = serde_json::to_string(&DeviationLevel::Moderate).unwrap();
        assert_eq!(json, r#""moderate""#);
    }
}
