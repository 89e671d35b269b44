//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/storelens/config.toml`, then the
//! abuse thresholds may be overridden from `STORELENS_*` environment
//! variables. Both happen once at startup; the resulting [`Config`] is
//! immutable and passed explicitly to every component.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/storelens/` (~/.config/storelens/)
//! - Data: `$XDG_DATA_HOME/storelens/` (~/.local/share/storelens/)
//! - State/Logs: `$XDG_STATE_HOME/storelens/` (~/.local/state/storelens/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Largest ledger batch the HTTP ledger service accepts in one filter list.
pub const MAX_LEDGER_BATCH_SIZE: usize = 500;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Abuse-session heuristics
    #[serde(default)]
    pub abuse: AbuseConfig,

    /// Report shape
    #[serde(default)]
    pub report: ReportConfig,

    /// Event store access
    #[serde(default)]
    pub store: StoreConfig,

    /// Purchase ledger access
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Thresholds for the abuse-session analyzer.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AbuseConfig {
    /// Disable to pass bot-filtered page views through untouched
    #[serde(default = "default_abuse_enabled")]
    pub enabled: bool,

    /// More views than this inside any 60 second window flags the session
    #[serde(default = "default_max_views_per_minute")]
    pub max_views_per_minute: usize,

    /// More views than this in the window flags the session
    #[serde(default = "default_max_views_per_session")]
    pub max_views_per_session: usize,

    /// Mean interval between views below this flags the session
    #[serde(default = "default_min_avg_interval_ms")]
    pub min_avg_interval_ms: u64,

    /// Length of a fast-interval streak that flags the session
    #[serde(default = "default_consecutive_fast_views")]
    pub consecutive_fast_views: usize,

    /// An interval below this counts as "fast"
    #[serde(default = "default_fast_view_threshold_ms")]
    pub fast_view_threshold_ms: u64,

    /// Sessions with fewer views are never judged
    #[serde(default = "default_min_views_for_analysis")]
    pub min_views_for_analysis: usize,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            enabled: default_abuse_enabled(),
            max_views_per_minute: default_max_views_per_minute(),
            max_views_per_session: default_max_views_per_session(),
            min_avg_interval_ms: default_min_avg_interval_ms(),
            consecutive_fast_views: default_consecutive_fast_views(),
            fast_view_threshold_ms: default_fast_view_threshold_ms(),
            min_views_for_analysis: default_min_views_for_analysis(),
        }
    }
}

fn default_abuse_enabled() -> bool {
    true
}

fn default_max_views_per_minute() -> usize {
    30
}

fn default_max_views_per_session() -> usize {
    500
}

fn default_min_avg_interval_ms() -> u64 {
    2000
}

fn default_consecutive_fast_views() -> usize {
    5
}

fn default_fast_view_threshold_ms() -> u64 {
    1000
}

fn default_min_views_for_analysis() -> usize {
    10
}

impl AbuseConfig {
    /// Validate thresholds, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("abuse.max_views_per_minute", self.max_views_per_minute as u64),
            ("abuse.max_views_per_session", self.max_views_per_session as u64),
            ("abuse.min_avg_interval_ms", self.min_avg_interval_ms),
            ("abuse.consecutive_fast_views", self.consecutive_fast_views as u64),
            ("abuse.fast_view_threshold_ms", self.fast_view_threshold_ms),
            ("abuse.min_views_for_analysis", self.min_views_for_analysis as u64),
        ];
        for (name, value) in checks {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than 0", name)));
            }
        }
        // A single view has no interval to measure.
        if self.min_views_for_analysis < 2 {
            return Err(Error::Config(
                "abuse.min_views_for_analysis must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `STORELENS_*` environment overrides, each independently.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STORELENS_ABUSE_ENABLED") {
            self.enabled = parse_bool("STORELENS_ABUSE_ENABLED", &v)?;
        }
        override_num(&lookup, "STORELENS_MAX_VIEWS_PER_MINUTE", &mut self.max_views_per_minute)?;
        override_num(&lookup, "STORELENS_MAX_VIEWS_PER_SESSION", &mut self.max_views_per_session)?;
        override_num(&lookup, "STORELENS_MIN_AVG_INTERVAL_MS", &mut self.min_avg_interval_ms)?;
        override_num(&lookup, "STORELENS_CONSECUTIVE_FAST_VIEWS", &mut self.consecutive_fast_views)?;
        override_num(&lookup, "STORELENS_FAST_VIEW_THRESHOLD_MS", &mut self.fast_view_threshold_ms)?;
        override_num(&lookup, "STORELENS_MIN_VIEWS_FOR_ANALYSIS", &mut self.min_views_for_analysis)?;
        Ok(())
    }
}

fn override_num<F, T>(lookup: &F, name: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} is not a valid number: {:?}", name, raw)))?;
    }
    Ok(())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{} is not a boolean: {:?}", name, raw))),
    }
}

/// Report shape configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReportConfig {
    /// Buckets in a daily report
    #[serde(default = "default_daily_buckets")]
    pub daily_buckets: u32,

    /// Buckets in a weekly report
    #[serde(default = "default_weekly_buckets")]
    pub weekly_buckets: u32,

    /// Buckets in a monthly report
    #[serde(default = "default_monthly_buckets")]
    pub monthly_buckets: u32,

    /// Groups kept per breakdown
    #[serde(default = "default_breakdown_limit")]
    pub breakdown_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            daily_buckets: default_daily_buckets(),
            weekly_buckets: default_weekly_buckets(),
            monthly_buckets: default_monthly_buckets(),
            breakdown_limit: default_breakdown_limit(),
        }
    }
}

fn default_daily_buckets() -> u32 {
    30
}

fn default_weekly_buckets() -> u32 {
    12
}

fn default_monthly_buckets() -> u32 {
    12
}

fn default_breakdown_limit() -> usize {
    10
}

impl ReportConfig {
    /// Bucket count for a granularity.
    pub fn buckets_for(&self, granularity: crate::types::Granularity) -> u32 {
        match granularity {
            crate::types::Granularity::Daily => self.daily_buckets,
            crate::types::Granularity::Weekly => self.weekly_buckets,
            crate::types::Granularity::Monthly => self.monthly_buckets,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.daily_buckets == 0 || self.weekly_buckets == 0 || self.monthly_buckets == 0 {
            return Err(Error::Config(
                "report bucket counts must be greater than 0".to_string(),
            ));
        }
        if self.breakdown_limit == 0 {
            return Err(Error::Config(
                "report.breakdown_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event store configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Rows per page read
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Override for the SQLite event store path
    pub database_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            database_path: None,
        }
    }
}

fn default_page_size() -> usize {
    1000
}

/// Which purchase ledger implementation to use.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    /// The `orders` table of the local event store
    #[default]
    Sqlite,
    /// The remote ledger service
    Http,
}

/// Purchase ledger configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,

    /// Ledger service URL (e.g., `https://ledger.example.com`)
    pub server_url: Option<String>,

    /// Bearer token for the ledger service
    pub api_key: Option<String>,

    /// User ids per lookup (the ledger's filter-list limit)
    #[serde(default = "default_ledger_batch_size")]
    pub batch_size: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_ledger_timeout")]
    pub timeout_secs: u64,

    /// Orders must be strictly above this amount to count as paid
    #[serde(default)]
    pub min_amount: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            server_url: None,
            api_key: None,
            batch_size: default_ledger_batch_size(),
            timeout_secs: default_ledger_timeout(),
            min_amount: 0.0,
        }
    }
}

fn default_ledger_batch_size() -> usize {
    100
}

fn default_ledger_timeout() -> u64 {
    30
}

impl LedgerConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_LEDGER_BATCH_SIZE {
            return Err(Error::Config(format!(
                "ledger.batch_size must be between 1 and {}",
                MAX_LEDGER_BATCH_SIZE
            )));
        }
        if !self.min_amount.is_finite() || self.min_amount < 0.0 {
            return Err(Error::Config(
                "ledger.min_amount must be a non-negative number".to_string(),
            ));
        }
        if self.backend == LedgerBackend::Http && self.server_url.is_none() {
            return Err(Error::Config(
                "ledger.server_url is required when ledger.backend = \"http\"".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path and apply environment overrides.
    ///
    /// The result is validated, so a bad threshold fails here at startup
    /// rather than while serving a report.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.abuse.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.abuse.validate()?;
        self.report.validate()?;
        if self.store.page_size == 0 {
            return Err(Error::Config(
                "store.page_size must be greater than 0".to_string(),
            ));
        }
        self.ledger.validate()?;
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/storelens/config.toml` (~/.config/storelens/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("storelens").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite event store)
    ///
    /// `$XDG_DATA_HOME/storelens/` (~/.local/share/storelens/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("storelens")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/storelens/` (~/.local/state/storelens/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("storelens")
    }

    /// Returns the event store path, honoring `store.database_path`.
    ///
    /// Default: `$XDG_DATA_HOME/storelens/events.db`
    pub fn database_path(&self) -> PathBuf {
        self.store
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("events.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.abuse.enabled);
        assert_eq!(config.abuse.max_views_per_minute, 30);
        assert_eq!(config.abuse.max_views_per_session, 500);
        assert_eq!(config.abuse.min_avg_interval_ms, 2000);
        assert_eq!(config.abuse.consecutive_fast_views, 5);
        assert_eq!(config.abuse.fast_view_threshold_ms, 1000);
        assert_eq!(config.abuse.min_views_for_analysis, 10);
        assert_eq!(config.store.page_size, 1000);
        assert_eq!(config.ledger.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[abuse]
enabled = false
max_views_per_minute = 60

[report]
daily_buckets = 7

[ledger]
backend = "http"
server_url = "https://ledger.example.com"
batch_size = 50

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert!(!config.abuse.enabled);
        assert_eq!(config.abuse.max_views_per_minute, 60);
        assert_eq!(config.abuse.max_views_per_session, 500);
        assert_eq!(config.report.daily_buckets, 7);
        assert_eq!(config.report.weekly_buckets, 12);
        assert_eq!(config.ledger.backend, LedgerBackend::Http);
        assert_eq!(config.ledger.batch_size, 50);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let mut config = Config::default();
        config.abuse.consecutive_fast_views = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consecutive_fast_views"));
    }

    #[test]
    fn test_ledger_validation() {
        let config = LedgerConfig {
            backend: LedgerBackend::Http,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LedgerConfig {
            batch_size: MAX_LEDGER_BATCH_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LedgerConfig {
            min_amount: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_are_independent() {
        let vars: HashMap<&str, &str> = [
            ("STORELENS_MAX_VIEWS_PER_MINUTE", "45"),
            ("STORELENS_ABUSE_ENABLED", "off"),
        ]
        .into_iter()
        .collect();

        let mut abuse = AbuseConfig::default();
        abuse
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(abuse.max_views_per_minute, 45);
        assert!(!abuse.enabled);
        // Untouched thresholds keep their defaults
        assert_eq!(abuse.max_views_per_session, 500);
        assert_eq!(abuse.min_views_for_analysis, 10);
    }

    #[test]
    fn test_bad_env_override_fails() {
        let mut abuse = AbuseConfig::default();
        let result = abuse.apply_overrides(|name| {
            (name == "STORELENS_FAST_VIEW_THRESHOLD_MS").then(|| "fast".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_buckets_for_granularity() {
        use crate::types::Granularity;
        let report = ReportConfig::default();
        assert_eq!(report.buckets_for(Granularity::Daily), 30);
        assert_eq!(report.buckets_for(Granularity::Weekly), 12);
        assert_eq!(report.buckets_for(Granularity::Monthly), 12);
    }
}
