//! The `report` command: a reconciliation pass focused on the artifacts.
//!
//! Runs the pipeline in dry-run mode (no work-item writes) unless the
//! caller passes `--sync`, and writes the JSON/CSV reports into the
//! requested directory.

use std::path::PathBuf;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use tb_domain::config::Config;
use tb_engine::orchestrator::RunRequest;

use crate::commands::sync::check_config;
use crate::{app, output};

pub async fn run(
    config: &Config,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    output_dir: Option<PathBuf>,
    sync: bool,
) -> anyhow::Result<u8> {
    check_config(config)?;

    let cancel = CancellationToken::new();
    let orchestrator =
        app::build_orchestrator(config, !sync, output_dir.as_deref(), cancel.clone())?;

    let record = orchestrator
        .run(RunRequest {
            start_date,
            end_date,
            users: None,
            project: None,
        })
        .await;

    match record.stages.reports {
        Some(ref files) => {
            println!("Reportes generados:");
            println!("  {}", files.json.display());
            println!("  {}", files.csv.display());
        }
        None => println!("No se generaron reportes."),
    }
    output::print_errors(&record.errors);

    Ok(if record.success { 0 } else { 1 })
}
