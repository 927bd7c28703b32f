//! The `status` command: configuration, store, and access checks.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use tb_domain::config::{Config, ConfigSeverity};

use crate::app;

pub async fn run(config: &Config, config_path: &Path) -> anyhow::Result<u8> {
    println!("── Estado de TimeBridge ──");
    println!("Configuración: {}", config_path.display());

    let issues = config.validate();
    let mut degraded = false;
    if issues.is_empty() {
        println!("Configuración válida.");
    } else {
        for issue in &issues {
            println!("  {issue}");
            if issue.severity == ConfigSeverity::Error {
                degraded = true;
            }
        }
    }

    match app::open_store(config) {
        Ok(store) => println!(
            "Entradas manuales: {} ({} pendientes) en {}",
            store.len(),
            store.unsynced().len(),
            store.path().display()
        ),
        Err(e) => {
            println!("Almacén de entradas manuales: ERROR ({e:#})");
            degraded = true;
        }
    }

    // Calendar access probe: resolve a token and read the default user.
    match app::build_calendar_client(config, CancellationToken::new()) {
        Ok(client) => {
            use tb_clients::calendar::CalendarSource;
            match client.get_user_info(&config.calendar.default_user).await {
                Ok(_) => println!("Acceso al calendario: OK"),
                Err(e) => {
                    println!("Acceso al calendario: ERROR ({e})");
                    degraded = true;
                }
            }
        }
        Err(e) => println!("Credenciales del calendario sin configurar: {e:#}"),
    }

    // Organisation-level access probe against the work-item store.
    match app::build_work_item_client(config, CancellationToken::new()) {
        Ok(client) => match client.get_projects().await {
            Ok(projects) => {
                println!(
                    "Acceso al work-item store: OK ({} proyectos visibles)",
                    projects.len()
                );
            }
            Err(e) => {
                println!("Acceso al work-item store: ERROR ({e})");
                degraded = true;
            }
        },
        Err(e) => println!("Credenciales del work-item store sin configurar: {e:#}"),
    }

    println!(
        "Zona horaria: {} · Estrategia de conflictos: {} · Dry-run: {}",
        config.sync.timezone,
        config.sync.conflict_strategy.as_str(),
        config.sync.dry_run
    );

    Ok(if degraded { 1 } else { 0 })
}
