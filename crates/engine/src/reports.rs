//! Report rendering.
//!
//! Writes comparison data as JSON (machine consumption) and CSV (human
//! consumption) into the configured output directory. Filenames encode
//! the report type and date or timestamp.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;

use tb_domain::comparison::{fmt_sentinel, Comparison, ComparisonStats, DeviationLevel};
use tb_domain::error::{Error, Result};

/// CSV columns for one comparison row.
const CSV_COLUMNS: [&str; 12] = [
    "work_item_id",
    "work_item_title",
    "estimated_hours",
    "actual_hours",
    "meeting_hours",
    "execution_hours",
    "variance_absolute",
    "variance_percentage",
    "variance_ratio",
    "deviation_level",
    "deviation_description",
    "recommendation",
];

/// Paths of the rendered artifacts for one report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportFiles {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Renders reports into one output directory.
pub struct ReportGenerator {
    output_dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        tracing::info!(dir = %output_dir.display(), "report generator ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    // ── Report types ─────────────────────────────────────────────────

    /// Daily reconciliation report.
    pub fn daily_report(
        &self,
        report_date: NaiveDate,
        comparisons: &[Comparison],
        stats: &ComparisonStats,
    ) -> Result<ReportFiles> {
        tracing::info!(%report_date, items = comparisons.len(), "generating daily report");

        let data = serde_json::json!({
            "report_type": "daily",
            "report_date": report_date.to_string(),
            "generated_at": Utc::now().to_rfc3339(),
            "summary": summary_block(stats),
            "deviations_by_level": stats.by_level,
            "work_items": comparisons,
            "top_deviations": stats.top_deviations,
        });

        self.render(&format!("daily_report_{report_date}"), &data, comparisons)
    }

    /// Sprint summary report.
    pub fn sprint_summary(
        &self,
        sprint_name: &str,
        sprint_start: NaiveDate,
        sprint_end: NaiveDate,
        comparisons: &[Comparison],
        stats: &ComparisonStats,
    ) -> Result<ReportFiles> {
        tracing::info!(sprint_name, "generating sprint summary");

        let data = serde_json::json!({
            "report_type": "sprint_summary",
            "sprint_name": sprint_name,
            "sprint_start": sprint_start.to_string(),
            "sprint_end": sprint_end.to_string(),
            "generated_at": Utc::now().to_rfc3339(),
            "summary": summary_block(stats),
            "deviations_by_level": stats.by_level,
            "work_items": comparisons,
            "top_deviations": stats.top_deviations,
        });

        let safe_name = sprint_name.replace(' ', "_").replace('/', "-");
        self.render(
            &format!("sprint_summary_{safe_name}_{sprint_start}"),
            &data,
            comparisons,
        )
    }

    /// Report focused on items at or above a deviation level.
    pub fn discrepancy_report(
        &self,
        discrepancies: &[Comparison],
        min_level: DeviationLevel,
        generated_at: DateTime<Utc>,
    ) -> Result<ReportFiles> {
        tracing::info!(
            min_level = min_level.as_str(),
            count = discrepancies.len(),
            "generating discrepancy report"
        );

        let data = serde_json::json!({
            "report_type": "discrepancies",
            "generated_at": generated_at.to_rfc3339(),
            "min_deviation_level": min_level.as_str(),
            "summary": { "total_discrepancies": discrepancies.len() },
            "discrepancies": discrepancies,
        });

        let stamp = generated_at.format("%Y%m%d_%H%M%S");
        self.render(&format!("discrepancy_report_{stamp}"), &data, discrepancies)
    }

    // ── Rendering ────────────────────────────────────────────────────

    fn render(
        &self,
        filename_base: &str,
        data: &Value,
        comparisons: &[Comparison],
    ) -> Result<ReportFiles> {
        let json = self.write_json(filename_base, data)?;
        let csv = self.write_csv(filename_base, comparisons)?;
        tracing::info!(json = %json.display(), csv = %csv.display(), "report written");
        Ok(ReportFiles { json, csv })
    }

    fn write_json(&self, filename_base: &str, data: &Value) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{filename_base}.json"));
        let rendered = serde_json::to_string_pretty(data)?;
        std::fs::write(&path, rendered)?;
        Ok(path)
    }

    fn write_csv(&self, filename_base: &str, comparisons: &[Comparison]) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("{filename_base}.csv"));
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        writer
            .write_record(CSV_COLUMNS)
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

        for c in comparisons {
            writer
                .write_record([
                    c.work_item_id.to_string(),
                    c.title.clone(),
                    format!("{:.2}", c.estimated_hours),
                    format!("{:.2}", c.actual_hours),
                    c.meeting_hours.map(|h| format!("{h:.2}")).unwrap_or_default(),
                    c.execution_hours.map(|h| format!("{h:.2}")).unwrap_or_default(),
                    format!("{:.2}", c.variance_absolute),
                    fmt_sentinel(c.variance_percentage),
                    fmt_sentinel(c.variance_ratio),
                    c.deviation_level.as_str().to_string(),
                    c.deviation_description.clone(),
                    c.recommendation.clone(),
                ])
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        }

        writer
            .flush()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        Ok(path)
    }
}

/// The shared summary block embedded in every JSON report.
fn summary_block(stats: &ComparisonStats) -> Value {
    serde_json::json!({
        "total_work_items": stats.total_items,
        "total_estimated_hours": stats.total_estimated_hours,
        "total_actual_hours": stats.total_actual_hours,
        "total_meeting_hours": stats.total_meeting_hours,
        "total_execution_hours": stats.total_execution_hours,
        "overall_variance_percentage": sentinel_value(stats.overall_variance_percentage),
        "overall_variance_ratio": sentinel_value(stats.overall_variance_ratio),
        "acceptable_count": stats.acceptable_count,
        "deviation_count": stats.deviation_count,
        "average_estimated": stats.average_estimated,
        "average_actual": stats.average_actual,
    })
}

fn sentinel_value(v: f64) -> Value {
    if v.is_finite() {
        Value::from(v)
    } else {
        Value::from("inf")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
