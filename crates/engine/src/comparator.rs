//! Estimate-vs-actual time comparison.
//!
//! Computes variance metrics, categorises deviation severity against
//! configurable thresholds, and aggregates batch statistics. A zero
//! estimate with non-zero actual hours uses the infinity sentinel, which
//! always categorises as `High`.

use std::cmp::Ordering;

use tb_domain::comparison::{
    Comparison, ComparisonStats, DeviationLevel, LevelCounts, Variance,
};
use tb_domain::meeting::round2;

/// Items kept in the top-deviations ranking.
const TOP_DEVIATIONS: usize = 5;

/// Input for one comparison, aggregated upstream by work item.
#[derive(Debug, Clone, Default)]
pub struct ComparisonInput {
    pub work_item_id: i64,
    pub title: String,
    pub estimated_hours: f64,
    pub actual_hours: f64,
    pub meeting_hours: Option<f64>,
    pub execution_hours: Option<f64>,
}

/// Compares actual time worked against estimates.
#[derive(Debug, Clone, Copy)]
pub struct TimeComparator {
    /// Variance within this fraction is acceptable.
    acceptable_variance: f64,
    light_threshold: f64,
    moderate_threshold: f64,
}

impl Default for TimeComparator {
    fn default() -> Self {
        Self {
            acceptable_variance: 0.10,
            light_threshold: 0.25,
            moderate_threshold: 0.50,
        }
    }
}

impl TimeComparator {
    pub fn new(acceptable_variance: f64, light_threshold: f64, moderate_threshold: f64) -> Self {
        Self {
            acceptable_variance,
            light_threshold,
            moderate_threshold,
        }
    }

    // ── Variance ─────────────────────────────────────────────────────

    /// Variance metrics between estimated and actual hours.
    ///
    /// A zero estimate yields percentage 0 / ratio 1 when the actual is
    /// also zero, and the infinity sentinel otherwise.
    pub fn calculate_variance(estimated: f64, actual: f64) -> Variance {
        let (variance_percentage, variance_ratio) = if estimated == 0.0 {
            if actual == 0.0 {
                (0.0, 1.0)
            } else {
                (f64::INFINITY, f64::INFINITY)
            }
        } else {
            (
                (actual - estimated) / estimated * 100.0,
                actual / estimated,
            )
        };

        Variance {
            variance_absolute: actual - estimated,
            variance_percentage,
            variance_ratio,
            is_over_estimate: actual > estimated,
            is_under_estimate: actual < estimated,
        }
    }

    /// Categorise `|variance_percentage| / 100` against the thresholds.
    pub fn categorize(&self, variance_percentage: f64) -> DeviationLevel {
        let abs = variance_percentage.abs() / 100.0;
        if abs <= self.acceptable_variance {
            DeviationLevel::None
        } else if abs <= self.light_threshold {
            DeviationLevel::Light
        } else if abs <= self.moderate_threshold {
            DeviationLevel::Moderate
        } else {
            DeviationLevel::High
        }
    }

    // ── Single comparison ────────────────────────────────────────────

    pub fn compare(&self, input: ComparisonInput) -> Comparison {
        let variance = Self::calculate_variance(input.estimated_hours, input.actual_hours);
        let level = self.categorize(variance.variance_percentage);

        tracing::debug!(
            work_item_id = input.work_item_id,
            estimated = input.estimated_hours,
            actual = input.actual_hours,
            level = level.as_str(),
            "comparison computed"
        );

        Comparison {
            work_item_id: input.work_item_id,
            title: if input.title.is_empty() {
                format!("Work Item #{}", input.work_item_id)
            } else {
                input.title
            },
            estimated_hours: input.estimated_hours,
            actual_hours: input.actual_hours,
            meeting_hours: input.meeting_hours,
            execution_hours: input.execution_hours,
            variance_absolute: variance.variance_absolute,
            variance_percentage: variance.variance_percentage,
            variance_ratio: variance.variance_ratio,
            is_over_estimate: variance.is_over_estimate,
            is_under_estimate: variance.is_under_estimate,
            deviation_level: level,
            deviation_description: deviation_description(level).into(),
            is_acceptable: level == DeviationLevel::None,
            recommendation: recommendation(level, variance.is_over_estimate).into(),
        }
    }

    // ── Batch ────────────────────────────────────────────────────────

    pub fn compare_batch(
        &self,
        inputs: Vec<ComparisonInput>,
    ) -> (Vec<Comparison>, ComparisonStats) {
        let comparisons: Vec<Comparison> =
            inputs.into_iter().map(|input| self.compare(input)).collect();
        let stats = self.statistics(&comparisons);
        tracing::info!(
            total = comparisons.len(),
            acceptable = stats.acceptable_count,
            deviations = stats.deviation_count,
            "batch comparison complete"
        );
        (comparisons, stats)
    }

    /// Aggregate statistics over a set of comparisons.
    pub fn statistics(&self, comparisons: &[Comparison]) -> ComparisonStats {
        let total_estimated: f64 = comparisons.iter().map(|c| c.estimated_hours).sum();
        let total_actual: f64 = comparisons.iter().map(|c| c.actual_hours).sum();
        let total_meeting: f64 = comparisons.iter().filter_map(|c| c.meeting_hours).sum();
        let total_execution: f64 = comparisons.iter().filter_map(|c| c.execution_hours).sum();

        let mut by_level = LevelCounts::default();
        for c in comparisons {
            by_level.bump(c.deviation_level);
        }
        let acceptable_count = comparisons.iter().filter(|c| c.is_acceptable).count();

        let overall = Self::calculate_variance(total_estimated, total_actual);

        let mut ranked: Vec<Comparison> = comparisons.to_vec();
        ranked.sort_by(|a, b| {
            cmp_abs_desc(a.variance_percentage, b.variance_percentage)
        });
        ranked.truncate(TOP_DEVIATIONS);

        let count = comparisons.len();
        let (average_estimated, average_actual) = if count == 0 {
            (0.0, 0.0)
        } else {
            (total_estimated / count as f64, total_actual / count as f64)
        };

        ComparisonStats {
            total_items: count,
            total_estimated_hours: round2(total_estimated),
            total_actual_hours: round2(total_actual),
            total_meeting_hours: round2(total_meeting),
            total_execution_hours: round2(total_execution),
            overall_variance_absolute: overall.variance_absolute,
            overall_variance_percentage: overall.variance_percentage,
            overall_variance_ratio: overall.variance_ratio,
            acceptable_count,
            deviation_count: count - acceptable_count,
            by_level,
            average_estimated: round2(average_estimated),
            average_actual: round2(average_actual),
            top_deviations: ranked,
        }
    }

    /// Comparisons at or above `min_level`, most severe first.
    pub fn discrepancies(
        comparisons: &[Comparison],
        min_level: DeviationLevel,
    ) -> Vec<Comparison> {
        let mut out: Vec<Comparison> = comparisons
            .iter()
            .filter(|c| c.deviation_level.rank() >= min_level.rank())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.deviation_level
                .rank()
                .cmp(&a.deviation_level.rank())
                .then_with(|| cmp_abs_desc(a.variance_percentage, b.variance_percentage))
        });
        out
    }
}

/// Descending order on `|value|`, with infinity first.
fn cmp_abs_desc(a: f64, b: f64) -> Ordering {
    b.abs().partial_cmp(&a.abs()).unwrap_or(Ordering::Equal)
}

/// Operator-facing severity description.
fn deviation_description(level: DeviationLevel) -> &'static str {
    match level {
        DeviationLevel::None => "Dentro del rango aceptable",
        DeviationLevel::Light => "Desviación leve",
        DeviationLevel::Moderate => "Desviación moderada",
        DeviationLevel::High => "Desviación alta",
    }
}

/// Operator-facing recommendation.
fn recommendation(level: DeviationLevel, is_over: bool) -> &'static str {
    match (level, is_over) {
        (DeviationLevel::None, _) => "El tiempo registrado está dentro del rango esperado.",
        (DeviationLevel::High, true) => {
            "El tiempo real excede significativamente la estimación. Revisar el alcance de la tarea."
        }
        (DeviationLevel::Moderate, true) => {
            "El tiempo real supera moderadamente la estimación. Considerar ajustar futuras estimaciones."
        }
        (DeviationLevel::Light, true) => "El tiempo real supera ligeramente la estimación.",
        (DeviationLevel::High, false) => {
            "La tarea se completó en mucho menos tiempo del estimado. Considerar optimizar estimaciones futuras."
        }
        (DeviationLevel::Moderate, false) => "La tarea se completó en menos tiempo del estimado.",
        (DeviationLevel::Light, false) => "El tiempo real es ligeramente menor a la estimación.",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: i64, estimated: f64, actual: f64) -> ComparisonInput {
        ComparisonInput {
            work_item_id: id,
            title: format!("item {id}"),
            estimated_hours: estimated,
            actual_hours: actual,
            meeting_hours: Some(actual),
            execution_hours: None,
        }
    }

    #[test]
    fn zero_zero_is_acceptable() {
        let c = TimeComparator::default().compare(input(1, 0.0, 0.0));
        assert_eq!(c.deviation_level, DeviationLevel::None);
        assert_eq!(c.variance_percentage, 0.0);
        assert_eq!(c.variance_ratio, 1.0);
        assert_eq!(c.variance_absolute, 0.0);
        assert!(c.is_acceptable);
    }

    #[test]
    fn zero_estimate_with_actual_is_infinite_and_high() {
        let c = TimeComparator::default().compare(input(1, 0.0, 5.0));
        assert!(c.variance_percentage.is_infinite());
        assert!(c.variance_ratio.is_infinite());
        assert_eq!(c.deviation_level, DeviationLevel::High);
        assert!(!c.is_acceptable);
        assert!(c.is_over_estimate);
    }

    #[test]
    fn variance_ratio_matches_division() {
        let v = TimeComparator::calculate_variance(8.0, 6.0);
        assert!((v.variance_ratio - 0.75).abs() < 1e-9);
        assert!((v.variance_percentage - -25.0).abs() < 1e-9);
        assert_eq!(v.variance_absolute, -2.0);
        assert!(v.is_under_estimate);
        assert!(!v.is_over_estimate);
    }

    #[test]
    fn threshold_boundaries() {
        let comparator = TimeComparator::default();
        assert_eq!(comparator.categorize(10.0), DeviationLevel::None);
        assert_eq!(comparator.categorize(-10.0), DeviationLevel::None);
        assert_eq!(comparator.categorize(10.01), DeviationLevel::Light);
        assert_eq!(comparator.categorize(25.0), DeviationLevel::Light);
        assert_eq!(comparator.categorize(25.01), DeviationLevel::Moderate);
        assert_eq!(comparator.categorize(50.0), DeviationLevel::Moderate);
        assert_eq!(comparator.categorize(50.01), DeviationLevel::High);
        assert_eq!(comparator.categorize(f64::INFINITY), DeviationLevel::High);
    }

    #[test]
    fn e1_one_hour_against_eight_is_high_under() {
        // 1h actual vs 8h estimate = -87.5% variance.
        let c = TimeComparator::default().compare(input(42, 8.0, 1.0));
        assert_eq!(c.deviation_level, DeviationLevel::High);
        assert!(c.is_under_estimate);
    }

    #[test]
    fn batch_statistics_totals_and_levels() {
        let comparator = TimeComparator::default();
        let (comparisons, stats) = comparator.compare_batch(vec![
            input(1, 10.0, 10.5), // none (5%)
            input(2, 10.0, 12.0), // light (20%)
            input(3, 10.0, 14.0), // moderate (40%)
            input(4, 10.0, 30.0), // high (200%)
        ]);

        assert_eq!(comparisons.len(), 4);
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.total_estimated_hours, 40.0);
        assert_eq!(stats.total_actual_hours, 66.5);
        assert_eq!(stats.acceptable_count, 1);
        assert_eq!(stats.deviation_count, 3);
        assert_eq!(stats.by_level.none, 1);
        assert_eq!(stats.by_level.light, 1);
        assert_eq!(stats.by_level.moderate, 1);
        assert_eq!(stats.by_level.high, 1);
        assert_eq!(stats.average_estimated, 10.0);
        // Top deviations ranked by |variance %|: item 4 first.
        assert_eq!(stats.top_deviations[0].work_item_id, 4);
    }

    #[test]
    fn top_deviations_capped_at_five() {
        let comparator = TimeComparator::default();
        let inputs: Vec<ComparisonInput> =
            (1..=8).map(|i| input(i, 10.0, 10.0 + i as f64)).collect();
        let (_, stats) = comparator.compare_batch(inputs);
        assert_eq!(stats.top_deviations.len(), 5);
        assert_eq!(stats.top_deviations[0].work_item_id, 8);
    }

    #[test]
    fn discrepancies_filter_and_order() {
        let comparator = TimeComparator::default();
        let (comparisons, _) = comparator.compare_batch(vec![
            input(1, 10.0, 10.0), // none
            input(2, 10.0, 12.0), // light
            input(3, 10.0, 14.0), // moderate
            input(4, 10.0, 30.0), // high
            input(5, 10.0, 16.0), // high? 60% -> high
        ]);

        let discrepancies =
            TimeComparator::discrepancies(&comparisons, DeviationLevel::Moderate);
        let ids: Vec<i64> = discrepancies.iter().map(|c| c.work_item_id).collect();
        // Highs first (largest variance first), then moderate.
        assert_eq!(ids, vec![4, 5, 3]);
    }

    #[test]
    fn empty_batch_statistics() {
        let stats = TimeComparator::default().statistics(&[]);
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.acceptable_count, 0);
        assert_eq!(stats.average_actual, 0.0);
        assert!(stats.top_deviations.is_empty());
        // 0/0 totals follow the zero-handling rule.
        assert_eq!(stats.overall_variance_percentage, 0.0);
    }

    #[test]
    fn spanish_descriptions_follow_level() {
        let c = TimeComparator::default().compare(input(1, 10.0, 30.0));
        assert_eq!(c.deviation_description, "Desviación alta");
        assert!(c.recommendation.contains("excede significativamente"));

        let c = TimeComparator::default().compare(input(1, 10.0, 10.0));
        assert!(c.recommendation.contains("dentro del rango esperado"));
    }
}
