//! Wiring: config → clients → engine.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tb_clients::auth::{AuthProvider, BasicAuthProvider, BearerAuthProvider};
use tb_clients::calendar::CalendarClient;
use tb_clients::transport::HttpTransport;
use tb_clients::work_items::{WorkItemClient, DEFAULT_QUERY_TOP};
use tb_domain::config::Config;
use tb_engine::orchestrator::{Orchestrator, OrchestratorConfig};
use tb_engine::reports::ReportGenerator;
use tb_tracker::ManualEntryStore;

/// Scope requested for calendar access tokens.
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Build the work-item client from the configured PAT.
pub fn build_work_item_client(
    config: &Config,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<WorkItemClient>> {
    let token = config.devops.resolve_token()?;
    let auth: Arc<dyn AuthProvider> = Arc::new(BasicAuthProvider::new(&token));
    let transport =
        Arc::new(HttpTransport::new(&config.http, auth)?.with_cancellation(cancel));
    Ok(Arc::new(WorkItemClient::new(
        transport,
        &config.devops.org_base_url(),
        config.devops.project.as_deref(),
    )))
}

/// Build the calendar client from the client-credentials config.
pub fn build_calendar_client(
    config: &Config,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<CalendarClient>> {
    let secret = config.calendar.resolve_client_secret()?;
    let auth: Arc<dyn AuthProvider> = Arc::new(BearerAuthProvider::new(
        &config.calendar.tenant_id,
        &config.calendar.client_id,
        &secret,
        GRAPH_SCOPE,
    )?);
    let transport =
        Arc::new(HttpTransport::new(&config.http, auth)?.with_cancellation(cancel));
    Ok(Arc::new(CalendarClient::new(
        transport,
        &config.calendar.base_url,
    )))
}

/// Assemble the full pipeline for one run.
pub fn build_orchestrator(
    config: &Config,
    dry_run: bool,
    report_dir: Option<&std::path::Path>,
    cancel: CancellationToken,
) -> anyhow::Result<Orchestrator> {
    let store = build_work_item_client(config, cancel.clone())?;
    let calendar = build_calendar_client(config, cancel.clone())?;

    let reports = ReportGenerator::new(report_dir.unwrap_or(&config.reports.report_dir))?;

    let cfg = OrchestratorConfig {
        dry_run: dry_run || config.sync.dry_run,
        conflict_strategy: config.sync.conflict_strategy,
        timezone: config.sync.tz()?,
        default_user: config.calendar.default_user.clone(),
        page_size: config.calendar.page_size,
        query_top: DEFAULT_QUERY_TOP,
        read_concurrency: 8,
        run_timeout: config.sync.run_timeout_secs.map(Duration::from_secs),
    };

    Ok(Orchestrator::new(calendar, store, Some(reports), cfg, cancel))
}

/// Open the manual-entry store at the configured path.
pub fn open_store(config: &Config) -> anyhow::Result<ManualEntryStore> {
    Ok(ManualEntryStore::new(&config.tracker.manual_store_path)?)
}
