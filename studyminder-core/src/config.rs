//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/studyminder/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/studyminder/` (~/.config/studyminder/)
//! - Data: `$XDG_DATA_HOME/studyminder/` (~/.local/share/studyminder/)
//! - State/Logs: `$XDG_STATE_HOME/studyminder/` (~/.local/state/studyminder/)

use crate::calendar::CivilCalendar;
use crate::error::{Error, Result};
use chrono::{FixedOffset, NaiveTime};
use serde::Deserialize;
use std::path::{Path, PathBuf};

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
    /// Generation/delivery timing and the civil timezone
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Delivery loop batching and retry policy
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Push gateway configuration (optional)
    #[serde(default)]
    pub push: PushConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// When the background jobs run, and which civil timezone they use.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    /// Civil hour (0-23) at which daily reminders are generated
    #[serde(default = "default_generation_hour")]
    pub generation_hour: u32,

    /// Whether the daemon delivers notifications automatically
    #[serde(default = "default_true")]
    pub auto_send_enabled: bool,

    /// Seconds between delivery loop runs
    #[serde(default = "default_delivery_interval")]
    pub delivery_interval_secs: u64,

    /// Whether the daemon runs the daily metrics sweep
    #[serde(default = "default_true")]
    pub metrics_sweep_enabled: bool,

    /// Civil hour of the daily metrics sweep
    #[serde(default = "default_metrics_sweep_hour")]
    pub metrics_sweep_hour: u32,

    /// How often the driver wakes up to check for due jobs
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// Fixed offset from UTC, in minutes, that defines the civil day
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,

    /// Reminder time used when a learner has none configured (`HH:MM`)
    #[serde(default = "default_reminder_time")]
    pub default_reminder_time: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            generation_hour: default_generation_hour(),
            auto_send_enabled: true,
            delivery_interval_secs: default_delivery_interval(),
            metrics_sweep_enabled: true,
            metrics_sweep_hour: default_metrics_sweep_hour(),
            tick_secs: default_tick_secs(),
            utc_offset_minutes: default_utc_offset_minutes(),
            default_reminder_time: default_reminder_time(),
        }
    }
}

impl ScheduleConfig {
    /// Build the civil calendar described by `utc_offset_minutes`.
    pub fn calendar(&self) -> Result<CivilCalendar> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "schedule.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })?;
        Ok(CivilCalendar::new(offset))
    }

    /// Parsed default reminder time.
    pub fn default_reminder_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.default_reminder_time, "%H:%M").map_err(|e| {
            Error::Config(format!(
                "schedule.default_reminder_time must be HH:MM, got {:?}: {}",
                self.default_reminder_time, e
            ))
        })
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.generation_hour > 23 {
            return Err(Error::Config(
                "schedule.generation_hour must be between 0 and 23".to_string(),
            ));
        }
        if self.metrics_sweep_hour > 23 {
            return Err(Error::Config(
                "schedule.metrics_sweep_hour must be between 0 and 23".to_string(),
            ));
        }
        if self.delivery_interval_secs == 0 || self.tick_secs == 0 {
            return Err(Error::Config(
                "schedule intervals must be greater than zero".to_string(),
            ));
        }
        self.calendar()?;
        self.default_reminder_time()?;
        Ok(())
    }
}

fn default_generation_hour() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

fn default_delivery_interval() -> u64 {
    3600
}

fn default_metrics_sweep_hour() -> u32 {
    3
}

fn default_tick_secs() -> u64 {
    60
}

fn default_utc_offset_minutes() -> i32 {
    -300
}

fn default_reminder_time() -> String {
    "19:00".to_string()
}

/// Delivery loop configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Notifications selected per delivery run
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed attempts before a notification is dead-lettered
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Minimum minutes between two attempts for the same notification
    #[serde(default = "default_retry_delay_minutes")]
    pub retry_delay_minutes: i64,

    /// Pause between consecutive sends in bulk dispatch (milliseconds)
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_minutes: default_retry_delay_minutes(),
            send_delay_ms: default_send_delay_ms(),
        }
    }
}

/// One week.
const MAX_RETRY_DELAY_MINUTES: i64 = 7 * 24 * 60;

impl DeliveryConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err(Error::Config(
                "delivery.batch_size must be between 1 and 500".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::Config(
                "delivery.max_retries must be at least 1".to_string(),
            ));
        }
        if !(0..=MAX_RETRY_DELAY_MINUTES).contains(&self.retry_delay_minutes) {
            return Err(Error::Config(format!(
                "delivery.retry_delay_minutes must be between 0 and {}",
                MAX_RETRY_DELAY_MINUTES
            )));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_minutes() -> i64 {
    15
}

fn default_send_delay_ms() -> u64 {
    100
}

/// Push gateway configuration
///
/// When enabled, notifications are handed to an HTTP push gateway that
/// forwards them to the device messaging provider.
#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    /// Enable/disable the push gateway
    #[serde(default)]
    pub enabled: bool,

    /// Gateway base URL (e.g., `https://push.example.com`)
    pub server_url: Option<String>,

    /// Bearer API key for the gateway
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: None,
            api_key: None,
            timeout_secs: default_push_timeout(),
        }
    }
}

impl PushConfig {
    /// Check if the gateway is properly configured and enabled
    pub fn is_ready(&self) -> bool {
        self.enabled && self.server_url.is_some() && self.api_key.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.server_url.is_none() {
            return Err(Error::Config(
                "push.server_url is required when push is enabled".to_string(),
            ));
        }
        if self.api_key.is_none() {
            return Err(Error::Config(
                "push.api_key is required when push is enabled".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "push.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_push_timeout() -> u64 {
    15
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
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.schedule.validate()?;
        self.delivery.validate()?;
        self.push.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/studyminder/config.toml` (~/.config/studyminder/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("studyminder").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("studyminder")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("studyminder")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/studyminder/data.db` (~/.local/share/studyminder/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// CLI binaries call this before anything reads the paths above.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schedule.generation_hour, 6);
        assert!(config.schedule.auto_send_enabled);
        assert_eq!(config.delivery.batch_size, 50);
        assert_eq!(config.delivery.max_retries, 5);
        assert_eq!(config.delivery.retry_delay_minutes, 15);
        assert!(!config.push.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[schedule]
generation_hour = 7
utc_offset_minutes = 60
default_reminder_time = "18:30"

[delivery]
batch_size = 20
max_retries = 2

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.schedule.generation_hour, 7);
        assert_eq!(config.schedule.delivery_interval_secs, 3600);
        assert_eq!(
            config.schedule.default_reminder_time().unwrap(),
            NaiveTime::from_hms_opt(18, 30, 0).unwrap()
        );
        assert_eq!(config.delivery.batch_size, 20);
        assert_eq!(config.delivery.max_retries, 2);
        assert_eq!(config.delivery.retry_delay_minutes, 15);
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_schedule_validation() {
        let schedule = ScheduleConfig {
            generation_hour: 24,
            ..Default::default()
        };
        assert!(schedule.validate().is_err());

        let schedule = ScheduleConfig {
            default_reminder_time: "7pm".to_string(),
            ..Default::default()
        };
        assert!(schedule.validate().is_err());

        let schedule = ScheduleConfig {
            utc_offset_minutes: 24 * 60,
            ..Default::default()
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_delivery_validation() {
        let delivery = DeliveryConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(delivery.validate().is_err());

        let delivery = DeliveryConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(delivery.validate().is_err());

        let delivery = DeliveryConfig {
            retry_delay_minutes: 10_080,
            ..Default::default()
        };
        assert!(delivery.validate().is_ok());

        for retry_delay_minutes in [-1, 10_081, i64::MAX] {
            let delivery = DeliveryConfig {
                retry_delay_minutes,
                ..Default::default()
            };
            assert!(delivery.validate().is_err());
        }
    }

    #[test]
    fn test_huge_retry_delay_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[delivery]\nretry_delay_minutes = 9223372036854775807\n",
        )
        .unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("retry_delay_minutes"));
    }

    #[test]
    fn test_push_config_validation() {
        // Disabled config is always valid
        let config = PushConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_ready());

        // Enabled without credentials should fail
        let config = PushConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PushConfig {
            enabled: true,
            server_url: Some("https://push.example.com".to_string()),
            api_key: Some("pk_test".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.is_ready());
    }

    #[test]
    fn test_metrics_sweep_can_be_disabled() {
        let toml = r#"
[schedule]
metrics_sweep_enabled = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(!config.schedule.metrics_sweep_enabled);
        assert_eq!(config.schedule.metrics_sweep_hour, 3);
    }
}
