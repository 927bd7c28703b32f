//! Scheduled execution of the sync workflow.
//!
//! A foreground tokio loop: daily jobs fire at a configured local time,
//! interval jobs every N hours. Each trigger runs the orchestrator for
//! the default range (yesterday → today) and records the outcome in a
//! bounded history.

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use tb_domain::config::{parse_daily_time, SyncConfig};
use tb_domain::error::{Error, Result};
use tb_engine::orchestrator::{Orchestrator, RunRequest};

/// Most recent job outcomes kept in memory.
const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub enum JobKind {
    Daily { hour: u32, minute: u32 },
    Interval { hours: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSpec {
    pub name: String,
    pub kind: JobKind,
}

impl JobSpec {
    pub fn describe(&self) -> String {
        match self.kind {
            JobKind::Daily { hour, minute } => {
                format!("{}: diario a las {hour:02}:{minute:02}", self.name)
            }
            JobKind::Interval { hours } => {
                format!("{}: cada {hours} horas", self.name)
            }
        }
    }
}

/// One recorded trigger.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: String,
    pub fired_at: DateTime<Utc>,
    pub success: bool,
    pub updated: usize,
    pub errors: usize,
}

/// Foreground job scheduler.
pub struct JobScheduler {
    tz: Tz,
    jobs: Vec<JobSpec>,
    history: Mutex<VecDeque<JobOutcome>>,
}

impl JobScheduler {
    pub fn new(tz: Tz, jobs: Vec<JobSpec>) -> Self {
        Self {
            tz,
            jobs,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Jobs from the configuration hints (`daily_time`,
    /// `sync_frequency_hours`); explicit CLI flags can add more.
    pub fn jobs_from_config(sync: &SyncConfig) -> Result<Vec<JobSpec>> {
        let mut jobs = Vec::new();
        if let Some(ref daily) = sync.daily_time {
            let (hour, minute) = parse_daily_time(daily).ok_or_else(|| {
                Error::Config(format!("sync.daily_time: expected HH:MM, got '{daily}'"))
            })?;
            jobs.push(JobSpec {
                name: "daily_sync".into(),
                kind: JobKind::Daily { hour, minute },
            });
        }
        if let Some(hours) = sync.sync_frequency_hours {
            if hours == 0 {
                return Err(Error::Config(
                    "sync.sync_frequency_hours must be greater than 0".into(),
                ));
            }
            jobs.push(JobSpec {
                name: "interval_sync".into(),
                kind: JobKind::Interval { hours },
            });
        }
        Ok(jobs)
    }

    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn history(&self) -> Vec<JobOutcome> {
        self.history.lock().iter().cloned().collect()
    }

    /// Next fire instant for a job, strictly after `now`.
    pub fn next_fire(&self, job: &JobSpec, now: DateTime<Tz>) -> DateTime<Tz> {
        match job.kind {
            JobKind::Daily { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN);
                let today = now.date_naive().and_time(time);
                let candidate = match self.tz.from_local_datetime(&today) {
                    chrono::LocalResult::Single(dt) => dt,
                    chrono::LocalResult::Ambiguous(dt, _) => dt,
                    chrono::LocalResult::None => self.tz.from_utc_datetime(&today),
                };
                if candidate > now {
                    candidate
                } else {
                    candidate + ChronoDuration::days(1)
                }
            }
            JobKind::Interval { hours } => now + ChronoDuration::hours(hours as i64),
        }
    }

    /// The job that fires soonest.
    fn soonest(&self, now: DateTime<Tz>) -> Option<(&JobSpec, DateTime<Tz>)> {
        self.jobs
            .iter()
            .map(|job| (job, self.next_fire(job, now)))
            .min_by_key(|(_, at)| *at)
    }

    /// Run until cancelled. Each trigger syncs yesterday → today.
    pub async fn run_forever(&self, orchestrator: &Orchestrator, cancel: &CancellationToken) {
        if self.jobs.is_empty() {
            tracing::warn!("scheduler started with no jobs configured");
            return;
        }
        for job in &self.jobs {
            tracing::info!(job = %job.describe(), "job scheduled");
        }

        loop {
            let now = Utc::now().with_timezone(&self.tz);
            let Some((job, fire_at)) = self.soonest(now) else {
                return;
            };
            let wait = (fire_at - now).to_std().unwrap_or_default();
            tracing::info!(job = %job.name, fire_at = %fire_at, "waiting for next trigger");

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            tracing::info!(job = %job.name, "trigger fired");
            let record = orchestrator.run(RunRequest::default()).await;

            let mut history = self.history.lock();
            if history.len() == HISTORY_CAP {
                history.pop_front();
            }
            history.push_back(JobOutcome {
                job: job.name.clone(),
                fired_at: Utc::now(),
                success: record.success,
                updated: record.summary.work_items_updated,
                errors: record.errors.len(),
            });
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn tz() -> Tz {
        "America/Bogota".parse().unwrap()
    }

    #[test]
    fn daily_job_fires_later_today_or_tomorrow() {
        let scheduler = JobScheduler::new(tz(), vec![]);
        let job = JobSpec {
            name: "daily_sync".into(),
            kind: JobKind::Daily { hour: 2, minute: 30 },
        };

        let before = tz().with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        let next = scheduler.next_fire(&job, before);
        assert_eq!(next, tz().with_ymd_and_hms(2025, 3, 10, 2, 30, 0).unwrap());

        let after = tz().with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        let next = scheduler.next_fire(&job, after);
        assert_eq!(next, tz().with_ymd_and_hms(2025, 3, 11, 2, 30, 0).unwrap());
    }

    #[test]
    fn interval_job_fires_after_period() {
        let scheduler = JobScheduler::new(tz(), vec![]);
        let job = JobSpec {
            name: "interval_sync".into(),
            kind: JobKind::Interval { hours: 4 },
        };
        let now = tz().with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        assert_eq!(
            scheduler.next_fire(&job, now),
            tz().with_ymd_and_hms(2025, 3, 10, 5, 0, 0).unwrap()
        );
    }

    #[test]
    fn jobs_from_config_hints() {
        let sync = SyncConfig {
            daily_time: Some("02:30".into()),
            sync_frequency_hours: Some(6),
            ..Default::default()
        };
        let jobs = JobScheduler::jobs_from_config(&sync).unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(matches!(jobs[0].kind, JobKind::Daily { hour: 2, minute: 30 }));
        assert!(matches!(jobs[1].kind, JobKind::Interval { hours: 6 }));
    }

    #[test]
    fn bad_config_hints_are_errors() {
        let sync = SyncConfig {
            daily_time: Some("25:00".into()),
            ..Default::default()
        };
        assert!(JobScheduler::jobs_from_config(&sync).is_err());

        let sync = SyncConfig {
            sync_frequency_hours: Some(0),
            ..Default::default()
        };
        assert!(JobScheduler::jobs_from_config(&sync).is_err());
    }

    #[test]
    fn soonest_picks_the_earliest_job() {
        let scheduler = JobScheduler::new(
            tz(),
            vec![
                JobSpec {
                    name: "daily_sync".into(),
                    kind: JobKind::Daily { hour: 23, minute: 0 },
                },
                JobSpec {
                    name: "interval_sync".into(),
                    kind: JobKind::Interval { hours: 2 },
                },
            ],
        );
        let now = tz().with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        let (job, _) = scheduler.soonest(now).unwrap();
        assert_eq!(job.name, "interval_sync");
    }
}
