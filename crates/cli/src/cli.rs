//! Command-line surface.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// TimeBridge — reconciles meeting effort with work-item completed work.
#[derive(Debug, Parser)]
#[command(name = "timebridge", version, about)]
pub struct Cli {
    /// Path to the config file (falls back to `TB_CONFIG`, then `config.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run time synchronization for a date range.
    Sync {
        /// Start date (YYYY-MM-DD, default: yesterday).
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// End date (YYYY-MM-DD, exclusive, default: today).
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// User IDs to sync (default: the configured principal).
        #[arg(long, num_args = 1..)]
        users: Option<Vec<String>>,
        /// Work-item project override.
        #[arg(long)]
        project: Option<String>,
        /// Preview changes without applying them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Add a manual time entry.
    Manual {
        /// Work item ID.
        #[arg(short = 'w', long)]
        work_item: i64,
        /// Hours worked.
        #[arg(short = 'H', long)]
        hours: f64,
        /// Date of work (YYYY-MM-DD, default: today).
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Description of the work performed.
        #[arg(short = 'D', long)]
        description: String,
        /// User who performed the work.
        #[arg(short, long)]
        user: String,
        /// Push unsynced entries to the work-item store right away.
        #[arg(long)]
        sync: bool,
    },
    /// Import entries from a CSV file.
    Import {
        /// CSV file path.
        csv_file: PathBuf,
        /// Push unsynced entries to the work-item store after importing.
        #[arg(long)]
        sync: bool,
    },
    /// Export entries to a CSV file.
    Export {
        /// Output CSV file path.
        csv_file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// Filter by sync status (true/false).
        #[arg(long)]
        synced: Option<bool>,
    },
    /// List manual time entries.
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Filter by sync status (true/false).
        #[arg(long)]
        synced: Option<bool>,
    },
    /// Show manual-entry summary statistics.
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Scheduled execution of the sync workflow.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Generate reports for a date range (dry-run unless --sync).
    Report {
        /// Start date (YYYY-MM-DD, default: yesterday).
        #[arg(long)]
        start_date: Option<NaiveDate>,
        /// End date (YYYY-MM-DD, exclusive, default: today).
        #[arg(long)]
        end_date: Option<NaiveDate>,
        /// Output directory override.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Apply work-item writes as part of the run.
        #[arg(long)]
        sync: bool,
    },
    /// Show system status.
    Status,
}

/// Shared manual-entry filter flags.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct FilterArgs {
    /// Filter by work item ID.
    #[arg(short = 'w', long)]
    pub work_item: Option<i64>,
    /// Filter by user ID.
    #[arg(short, long)]
    pub user: Option<String>,
    /// Start date (inclusive).
    #[arg(long)]
    pub start_date: Option<NaiveDate>,
    /// End date (inclusive).
    #[arg(long)]
    pub end_date: Option<NaiveDate>,
}

impl FilterArgs {
    pub fn into_filter(self, synced: Option<bool>) -> tb_domain::entry::EntryFilter {
        tb_domain::entry::EntryFilter {
            work_item_id: self.work_item,
            user_id: self.user,
            start_date: self.start_date,
            end_date: self.end_date,
            synced,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ScheduleAction {
    /// Run the scheduler in the foreground until interrupted.
    Start {
        /// Add a daily job (uses --time).
        #[arg(long)]
        daily: bool,
        /// Time for the daily job (HH:MM, local zone).
        #[arg(long, default_value = "00:00")]
        time: String,
        /// Add an interval job every N hours.
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Stop a running scheduler (foreground schedulers stop with Ctrl-C).
    Stop,
    /// Show the scheduler configuration.
    Status,
    /// List the jobs the configuration defines.
    Jobs,
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the configuration.
///
/// Precedence: `--config` flag, `TB_CONFIG` env var, `config.toml`. A
/// missing file yields the defaults; a malformed one is an error.
pub fn load_config(flag: Option<&std::path::Path>) -> anyhow::Result<(tb_domain::config::Config, PathBuf)> {
    let path = flag
        .map(|p| p.to_path_buf())
        .or_else(|| std::env::var("TB_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
    } else {
        tb_domain::config::Config::default()
    };

    Ok((config, path))
}
