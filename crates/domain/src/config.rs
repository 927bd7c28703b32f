//! TimeBridge configuration.
//!
//! Loaded from a TOML file (`TB_CONFIG` env var, default `config.toml`).
//! Secrets are never stored in the file: each credential field names an
//! environment variable that holds the actual value, with an optional
//! plaintext override for local development (warned on use).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::conflict::ConflictStrategy;
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub devops: DevOpsConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Default tracing filter when `RUST_LOG` is unset.
    #[serde(default = "d_log_level")]
    pub log_level: String,
}

fn d_log_level() -> String {
    "info".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Work-item provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevOpsConfig {
    /// Organization name (URL segment under the API base).
    #[serde(default)]
    pub org: String,
    /// Default project for WIQL queries.
    #[serde(default)]
    pub project: Option<String>,
    /// API base. The organization is appended as a path segment.
    #[serde(default = "d_devops_base_url")]
    pub base_url: String,
    /// Environment variable holding the personal access token.
    #[serde(default = "d_devops_token_env")]
    pub token_env: String,
    /// Plaintext token override for local development (warned on use).
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for DevOpsConfig {
    fn default() -> Self {
        Self {
            org: String::new(),
            project: None,
            base_url: d_devops_base_url(),
            token_env: d_devops_token_env(),
            token: None,
        }
    }
}

fn d_devops_base_url() -> String {
    "https://dev.azure.com".into()
}

fn d_devops_token_env() -> String {
    "TB_DEVOPS_TOKEN".into()
}

impl DevOpsConfig {
    /// Resolve the personal access token.
    ///
    /// Precedence: plaintext `token` field (warn), then `token_env`.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(ref token) = self.token {
            tracing::warn!(
                "work-item token loaded from plaintext config field 'token' — \
                 prefer 'token_env' instead"
            );
            return Ok(token.clone());
        }
        match std::env::var(&self.token_env) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Err(Error::Auth(format!(
                "environment variable '{}' not set or empty",
                self.token_env
            ))),
        }
    }

    /// Full API base for this organization, e.g. `https://dev.azure.com/contoso`.
    pub fn org_base_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.org)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Calendar provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Graph-shaped API base.
    #[serde(default = "d_calendar_base_url")]
    pub base_url: String,
    /// Application (client) ID for the client-credentials flow.
    #[serde(default)]
    pub client_id: String,
    /// Environment variable holding the client secret.
    #[serde(default = "d_client_secret_env")]
    pub client_secret_env: String,
    /// Plaintext secret override for local development (warned on use).
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Directory (tenant) ID.
    #[serde(default)]
    pub tenant_id: String,
    /// Default principal when a sync names no users.
    #[serde(default = "d_default_user")]
    pub default_user: String,
    /// Events per page.
    #[serde(default = "d_page_size")]
    pub page_size: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: d_calendar_base_url(),
            client_id: String::new(),
            client_secret_env: d_client_secret_env(),
            client_secret: None,
            tenant_id: String::new(),
            default_user: d_default_user(),
            page_size: d_page_size(),
        }
    }
}

fn d_calendar_base_url() -> String {
    "https://graph.microsoft.com/v1.0".into()
}

fn d_client_secret_env() -> String {
    "TB_GRAPH_CLIENT_SECRET".into()
}

fn d_default_user() -> String {
    "me".into()
}

fn d_page_size() -> u32 {
    100
}

impl CalendarConfig {
    /// Resolve the client secret, preferring the env var.
    pub fn resolve_client_secret(&self) -> Result<String> {
        if let Some(ref secret) = self.client_secret {
            tracing::warn!(
                "calendar client secret loaded from plaintext config field \
                 'client_secret' — prefer 'client_secret_env' instead"
            );
            return Ok(secret.clone());
        }
        match std::env::var(&self.client_secret_env) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Err(Error::Auth(format!(
                "environment variable '{}' not set or empty",
                self.client_secret_env
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP transport tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Maximum retry attempts on transient failures.
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    /// Backoff multiplier: delay = backoff_factor × 2^attempt seconds.
    #[serde(default = "d_backoff_factor")]
    pub backoff_factor: f64,
    /// Per-request timeout in seconds.
    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: d_max_retries(),
            backoff_factor: d_backoff_factor(),
            timeout_secs: d_timeout_secs(),
        }
    }
}

fn d_max_retries() -> u32 {
    3
}

fn d_backoff_factor() -> f64 {
    0.5
}

fn d_timeout_secs() -> u64 {
    30
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sync behaviour
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// IANA zone for all local-date computations.
    #[serde(default = "d_timezone")]
    pub timezone: String,
    /// Interval-trigger hint for the scheduler.
    #[serde(default)]
    pub sync_frequency_hours: Option<u32>,
    /// Daily-trigger hint for the scheduler, `HH:MM` local.
    #[serde(default)]
    pub daily_time: Option<String>,
    /// Skip all writes but record intended values.
    #[serde(default)]
    pub dry_run: bool,
    /// Default conflict-resolution strategy.
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    /// Optional whole-run timeout in seconds.
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timezone: d_timezone(),
            sync_frequency_hours: None,
            daily_time: None,
            dry_run: false,
            conflict_strategy: ConflictStrategy::default(),
            run_timeout_secs: None,
        }
    }
}

fn d_timezone() -> String {
    "America/Bogota".into()
}

impl SyncConfig {
    /// Parse the configured IANA zone.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone '{}'", self.timezone)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reports / tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Output directory for generated report files.
    #[serde(default = "d_report_dir")]
    pub report_dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            report_dir: d_report_dir(),
        }
    }
}

fn d_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// File path for the manual-entry store.
    #[serde(default = "d_manual_store_path")]
    pub manual_store_path: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            manual_store_path: d_manual_store_path(),
        }
    }
}

fn d_manual_store_path() -> PathBuf {
    PathBuf::from("data/manual_entries.json")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.devops.org.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "devops.org".into(),
                message: "organization must not be empty".into(),
            });
        }

        for (field, url) in [
            ("devops.base_url", &self.devops.base_url),
            ("calendar.base_url", &self.calendar.base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: format!("must start with http:// or https:// (got \"{url}\")"),
                });
            }
        }

        if self.sync.timezone.parse::<chrono_tz::Tz>().is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "sync.timezone".into(),
                message: format!("unknown IANA zone '{}'", self.sync.timezone),
            });
        }

        if let Some(ref daily) = self.sync.daily_time {
            if parse_daily_time(daily).is_none() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "sync.daily_time".into(),
                    message: format!("expected HH:MM, got '{daily}'"),
                });
            }
        }

        if self.calendar.client_id.is_empty() || self.calendar.tenant_id.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "calendar".into(),
                message: "client_id/tenant_id not set — calendar fetch will fail".into(),
            });
        }

        if self.calendar.page_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "calendar.page_size".into(),
                message: "page size must be greater than 0".into(),
            });
        }

        if self.http.max_retries > 10 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "http.max_retries".into(),
                message: "more than 10 retries will stall runs on outages".into(),
            });
        }

        issues
    }

    /// Whether any issue is an error.
    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

/// Parse a `HH:MM` daily-time hint into (hour, minute).
pub fn parse_daily_time(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_mostly_valid() {
        let config = Config::default();
        let issues = config.validate();
        // Empty org is the only hard error on a default config.
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "devops.org");
    }

    #[test]
    fn parses_minimal_toml() {
        let raw = r#"
            [devops]
            org = "contoso"
            project = "Platform"

            [calendar]
            client_id = "app-id"
            tenant_id = "tenant-id"

            [sync]
            timezone = "America/Bogota"
            dry_run = true
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.devops.org, "contoso");
        assert_eq!(config.devops.project.as_deref(), Some("Platform"));
        assert!(config.sync.dry_run);
        assert_eq!(config.http.max_retries, 3);
        assert_eq!(config.calendar.page_size, 100);
    }

    #[test]
    fn bad_timezone_is_an_error() {
        let mut config = Config::default();
        config.devops.org = "contoso".into();
        config.sync.timezone = "Mars/Olympus".into();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "sync.timezone" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn daily_time_parsing() {
        assert_eq!(parse_daily_time("00:00"), Some((0, 0)));
        assert_eq!(parse_daily_time("23:59"), Some((23, 59)));
        assert_eq!(parse_daily_time("24:00"), None);
        assert_eq!(parse_daily_time("8"), None);
        assert_eq!(parse_daily_time("8:61"), None);
    }

    #[test]
    fn org_base_url_joins_segments() {
        let devops = DevOpsConfig {
            org: "contoso".into(),
            ..Default::default()
        };
        assert_eq!(devops.org_base_url(), "https://dev.azure.com/contoso");
    }

    #[test]
    fn token_env_resolution() {
        let var = "TB_TEST_DEVOPS_TOKEN_9911";
        std::env::set_var(var, "pat-value");
        let devops = DevOpsConfig {
            token_env: var.into(),
            ..Default::default()
        };
        assert_eq!(devops.resolve_token().unwrap(), "pat-value");
        std::env::remove_var(var);
        assert!(devops.resolve_token().is_err());
    }
}
