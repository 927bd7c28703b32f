//! Manual-entry commands: `manual`, `import`, `export`, `list`, `summary`.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use tb_clients::work_items::WorkItemStore;
use tb_domain::config::Config;
use tb_engine::writer::WorkItemWriter;
use tb_tracker::{export_csv, import_csv, ManualEntryStore};

use crate::cli::FilterArgs;
use crate::{app, output};

pub async fn add(
    config: &Config,
    work_item: i64,
    hours: f64,
    date: Option<NaiveDate>,
    description: &str,
    user: &str,
    sync: bool,
) -> anyhow::Result<u8> {
    let store = app::open_store(config)?;
    let tz = config.sync.tz()?;
    let date = date.unwrap_or_else(|| Utc::now().with_timezone(&tz).date_naive());

    let entry = store.add_entry(work_item, hours, date, description, user)?;
    println!("Entrada registrada:");
    output::print_entry(&entry);

    if sync {
        return push_unsynced(config, &store).await;
    }
    Ok(0)
}

pub async fn import(config: &Config, csv_file: &Path, sync: bool) -> anyhow::Result<u8> {
    let store = app::open_store(config)?;
    let outcome = import_csv(&store, csv_file)?;

    println!(
        "Importadas {} entradas desde {}",
        outcome.imported.len(),
        csv_file.display()
    );
    if !outcome.errors.is_empty() {
        println!("Filas rechazadas: {}", outcome.errors.len());
        output::print_errors(&outcome.errors);
    }

    if sync {
        return push_unsynced(config, &store).await;
    }
    Ok(if outcome.errors.is_empty() { 0 } else { 1 })
}

pub fn export(
    config: &Config,
    csv_file: &Path,
    filter: FilterArgs,
    synced: Option<bool>,
) -> anyhow::Result<u8> {
    let store = app::open_store(config)?;
    let written = export_csv(&store, csv_file, &filter.into_filter(synced))?;
    println!("Exportadas {written} entradas a {}", csv_file.display());
    Ok(0)
}

pub fn list(config: &Config, filter: FilterArgs, synced: Option<bool>) -> anyhow::Result<u8> {
    let store = app::open_store(config)?;
    let entries = store.entries(&filter.into_filter(synced));
    output::print_entries(&entries);
    Ok(0)
}

pub fn summary(config: &Config, filter: FilterArgs) -> anyhow::Result<u8> {
    let store = app::open_store(config)?;
    let summary = store.summary(&filter.into_filter(None));
    output::print_entry_summary(&summary);
    Ok(0)
}

/// Push every unsynced entry to the work-item store.
///
/// Manual entries are execution hours on top of whatever the item already
/// carries, so each push adds the entry's hours to the current completed
/// work. Entries are only marked synced after a real (non-dry-run) write.
pub async fn push_unsynced(config: &Config, store: &ManualEntryStore) -> anyhow::Result<u8> {
    let entries = store.unsynced();
    if entries.is_empty() {
        println!("No hay entradas pendientes de sincronizar.");
        return Ok(0);
    }

    let client = app::build_work_item_client(config, CancellationToken::new())?;
    let store_handle: Arc<dyn WorkItemStore> = client.clone();
    let writer = WorkItemWriter::new(store_handle, config.sync.dry_run, 2.0);

    let mut pushed = 0usize;
    let mut failed = 0usize;
    for entry in entries {
        let current = match client.get_work_item(entry.work_item_id, None).await {
            Ok(item) => item.scheduling.completed_work,
            Err(e) => {
                tracing::warn!(
                    entry_id = %entry.entry_id,
                    work_item_id = entry.work_item_id,
                    error = %e,
                    "skipping entry, work item unavailable"
                );
                failed += 1;
                continue;
            }
        };

        let target = current + entry.hours;
        let comment = format!(
            "Horas de ejecución manual: {}h ({})",
            entry.hours, entry.description
        );
        let outcome = writer
            .update_completed_work(entry.work_item_id, target, Some(&comment), false)
            .await;

        if outcome.success {
            if !writer.is_dry_run() {
                store.mark_synced(&entry.entry_id)?;
            }
            pushed += 1;
        } else {
            failed += 1;
        }
    }

    println!("Sincronizadas {pushed} entradas, {failed} fallidas.");
    Ok(if failed == 0 { 0 } else { 1 })
}
