//! Operator-facing console output.
//!
//! Summaries stay in Spanish for continuity with the existing operators;
//! structured diagnostics go through `tracing` instead.

use tb_domain::comparison::fmt_sentinel;
use tb_domain::entry::TimeEntry;
use tb_engine::orchestrator::ExecutionRecord;
use tb_tracker::store::EntrySummary;

/// Errors shown before collapsing the rest into a count.
const MAX_SHOWN_ERRORS: usize = 5;

pub fn print_sync_summary(record: &ExecutionRecord) {
    let estado = if record.success {
        "completada"
    } else {
        "fallida"
    };
    println!("── Sincronización {estado} ──");
    println!("Rango: {} a {}", record.start_date, record.end_date);
    println!("Reuniones procesadas: {}", record.summary.total_meetings);
    println!(
        "Reuniones asignadas: {} (sin asignar: {})",
        record.summary.matched_meetings, record.summary.unmatched_meetings
    );
    println!(
        "Work items actualizados: {} (omitidos: {}, fallidos: {})",
        record.summary.work_items_updated,
        record.summary.work_items_skipped,
        record.summary.work_items_failed
    );
    if record.dry_run {
        println!("Modo de prueba: no se realizaron cambios.");
    }
    if let Some(ref stats) = record.stages.comparison {
        println!(
            "Horas: {}h estimadas vs {}h reales (variación {}%)",
            stats.statistics.total_estimated_hours,
            stats.statistics.total_actual_hours,
            fmt_sentinel(stats.statistics.overall_variance_percentage)
        );
    }
    if let Some(ref reports) = record.stages.reports {
        println!("Reportes generados:");
        println!("  {}", reports.json.display());
        println!("  {}", reports.csv.display());
    }
    print_errors(&record.errors);
}

pub fn print_errors(errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    println!("Errores ({}):", errors.len());
    for error in errors.iter().take(MAX_SHOWN_ERRORS) {
        println!("  - {error}");
    }
    if errors.len() > MAX_SHOWN_ERRORS {
        println!("  ... y {} más", errors.len() - MAX_SHOWN_ERRORS);
    }
}

pub fn print_entry(entry: &TimeEntry) {
    let estado = if entry.synced {
        "sincronizada"
    } else {
        "pendiente"
    };
    println!(
        "{}  #{:<6} {:>5.2}h  {}  {:<12} {}  ({estado})",
        entry.date, entry.work_item_id, entry.hours, entry.entry_id, entry.user_id, entry.description
    );
}

pub fn print_entries(entries: &[TimeEntry]) {
    if entries.is_empty() {
        println!("Sin entradas manuales.");
        return;
    }
    for entry in entries {
        print_entry(entry);
    }
    println!("Total: {} entradas", entries.len());
}

pub fn print_entry_summary(summary: &EntrySummary) {
    println!("── Resumen de entradas manuales ──");
    println!(
        "Entradas: {} ({} sincronizadas, {} pendientes)",
        summary.total_entries, summary.synced_entries, summary.unsynced_entries
    );
    println!("Horas totales: {:.2}h", summary.total_hours);
    if !summary.by_work_item.is_empty() {
        println!("Por work item:");
        for (id, totals) in &summary.by_work_item {
            println!("  #{id}: {} entradas, {:.2}h", totals.count, totals.hours);
        }
    }
    if !summary.by_user.is_empty() {
        println!("Por usuario:");
        for (user, totals) in &summary.by_user {
            println!("  {user}: {} entradas, {:.2}h", totals.count, totals.hours);
        }
    }
}
