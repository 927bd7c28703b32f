//! The `schedule` command group.

use tokio_util::sync::CancellationToken;

use tb_domain::config::{parse_daily_time, Config};
use tb_domain::error::Error;

use crate::cli::ScheduleAction;
use crate::commands::sync::check_config;
use crate::scheduler::{JobKind, JobScheduler, JobSpec};
use crate::app;

pub async fn run(config: &Config, action: ScheduleAction) -> anyhow::Result<u8> {
    match action {
        ScheduleAction::Start {
            daily,
            time,
            interval,
        } => start(config, daily, &time, interval).await,
        ScheduleAction::Stop => {
            println!("El planificador se ejecuta en primer plano; deténgalo con Ctrl-C.");
            Ok(0)
        }
        ScheduleAction::Status | ScheduleAction::Jobs => {
            let jobs = JobScheduler::jobs_from_config(&config.sync)?;
            if jobs.is_empty() {
                println!("No hay trabajos configurados (sync.daily_time / sync.sync_frequency_hours).");
            } else {
                println!("Trabajos configurados:");
                for job in &jobs {
                    println!("  {}", job.describe());
                }
            }
            Ok(0)
        }
    }
}

async fn start(
    config: &Config,
    daily: bool,
    time: &str,
    interval: Option<u32>,
) -> anyhow::Result<u8> {
    check_config(config)?;

    let mut jobs = JobScheduler::jobs_from_config(&config.sync)?;
    if daily {
        let (hour, minute) = parse_daily_time(time)
            .ok_or_else(|| Error::Config(format!("--time: expected HH:MM, got '{time}'")))?;
        jobs.push(JobSpec {
            name: "daily_sync".into(),
            kind: JobKind::Daily { hour, minute },
        });
    }
    if let Some(hours) = interval {
        if hours == 0 {
            anyhow::bail!("--interval must be greater than 0");
        }
        jobs.push(JobSpec {
            name: "interval_sync".into(),
            kind: JobKind::Interval { hours },
        });
    }
    if jobs.is_empty() {
        println!("No hay trabajos que planificar: use --daily o --interval.");
        return Ok(1);
    }

    let cancel = CancellationToken::new();
    let orchestrator = app::build_orchestrator(config, false, None, cancel.clone())?;
    let scheduler = JobScheduler::new(config.sync.tz()?, jobs);

    println!("Planificador iniciado (Ctrl-C para detener):");
    for job in scheduler.jobs() {
        println!("  {}", job.describe());
    }

    tokio::select! {
        _ = scheduler.run_forever(&orchestrator, &cancel) => Ok(0),
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            println!("Planificador detenido.");
            Ok(130)
        }
    }
}
