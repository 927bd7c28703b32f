//! The `sync` command: one full reconciliation run.

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use tb_domain::config::{Config, ConfigSeverity};
use tb_engine::orchestrator::RunRequest;

use crate::{app, output};

pub async fn run(
    config: &Config,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    users: Option<Vec<String>>,
    project: Option<String>,
    dry_run: bool,
) -> anyhow::Result<u8> {
    check_config(config)?;

    let cancel = CancellationToken::new();
    let orchestrator = app::build_orchestrator(config, dry_run, None, cancel.clone())?;

    let request = RunRequest {
        start_date,
        end_date,
        users,
        project,
    };

    let run = orchestrator.run(request);
    tokio::pin!(run);

    let mut interrupted = false;
    let record = tokio::select! {
        record = &mut run => Some(record),
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrumpido por el usuario, cancelando...");
            cancel.cancel();
            interrupted = true;
            None
        }
    };
    // A cancelled run still finishes cleanly and reports what it did.
    let record = match record {
        Some(record) => record,
        None => run.await,
    };

    output::print_sync_summary(&record);

    if interrupted {
        return Ok(130);
    }
    Ok(if record.success { 0 } else { 1 })
}

/// Log every config issue; errors abort before any network traffic.
pub fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}
