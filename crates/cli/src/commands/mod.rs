pub mod manual;
pub mod report;
pub mod schedule;
pub mod status;
pub mod sync;

use std::path::Path;

use tb_domain::config::Config;

use crate::cli::Command;

/// Route a parsed command to its handler; the returned code becomes the
/// process exit status (0 ok, 1 handled failure, 130 user interrupt).
pub async fn dispatch(command: Command, config: &Config, config_path: &Path) -> anyhow::Result<u8> {
    match command {
        Command::Sync {
            start_date,
            end_date,
            users,
            project,
            dry_run,
        } => sync::run(config, start_date, end_date, users, project, dry_run).await,
        Command::Manual {
            work_item,
            hours,
            date,
            description,
            user,
            sync,
        } => manual::add(config, work_item, hours, date, &description, &user, sync).await,
        Command::Import { csv_file, sync } => manual::import(config, &csv_file, sync).await,
        Command::Export {
            csv_file,
            filter,
            synced,
        } => manual::export(config, &csv_file, filter, synced),
        Command::List { filter, synced } => manual::list(config, filter, synced),
        Command::Summary { filter } => manual::summary(config, filter),
        Command::Schedule { action } => schedule::run(config, action).await,
        Command::Report {
            start_date,
            end_date,
            output,
            sync,
        } => report::run(config, start_date, end_date, output, sync).await,
        Command::Status => status::run(config, config_path).await,
    }
}
