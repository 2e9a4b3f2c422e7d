//! Configuration management
//!
//! Settings live in `settings.json` inside the data directory:
//! ```json
//! {
//!   "databaseFile": "xbank.duckdb",
//!   "confirmationHoldingSecs": 300,
//!   "sweepIntervalSecs": 10,
//!   "operationTimeoutSecs": 30,
//!   "logFormat": "pretty"
//! }
//! ```
//! Fields this crate does not manage are preserved when saving.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};

pub const SETTINGS_FILE: &str = "settings.json";

const DEFAULT_DATABASE_FILE: &str = "xbank.duckdb";
const DEFAULT_HOLDING_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Log output format for the CLI subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confirmation_holding_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sweep_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operation_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_format: Option<LogFormat>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_file: String,
    /// How long a transfer stays BLOCKED before the sweeper may confirm it
    pub confirmation_holding: Duration,
    pub sweep_interval: Duration,
    /// Deadline applied to each CLI operation and each sweep
    pub operation_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            confirmation_holding: Duration::from_secs(DEFAULT_HOLDING_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load config from the data directory
    ///
    /// Values can be overridden via environment variables
    /// `XBANK_HOLDING_SECS`, `XBANK_SWEEP_INTERVAL_SECS`,
    /// `XBANK_OPERATION_TIMEOUT_SECS` and `XBANK_LOG_FORMAT`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Self::load_with_env(data_dir, |key| std::env::var(key).ok())
    }

    /// Load config, reading overrides through `env`
    pub fn load_with_env(data_dir: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = read_settings(&settings_path(data_dir))?;
        let defaults = Config::default();

        let config = Self {
            database_file: raw.database_file.unwrap_or(defaults.database_file),
            confirmation_holding: secs_override(&env, "XBANK_HOLDING_SECS")?
                .or(raw.confirmation_holding_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.confirmation_holding),
            sweep_interval: secs_override(&env, "XBANK_SWEEP_INTERVAL_SECS")?
                .or(raw.sweep_interval_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            operation_timeout: secs_override(&env, "XBANK_OPERATION_TIMEOUT_SECS")?
                .or(raw.operation_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.operation_timeout),
            log_format: match env("XBANK_LOG_FORMAT") {
                Some(value) => LogFormat::parse(&value).ok_or_else(|| {
                    Error::config(format!("XBANK_LOG_FORMAT must be pretty or json, got {:?}", value))
                })?,
                None => raw.log_format.unwrap_or_default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database_file.trim().is_empty() {
            return Err(Error::config("databaseFile must not be empty"));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::config("sweepIntervalSecs must be at least 1"));
        }
        if self.operation_timeout.is_zero() {
            return Err(Error::config("operationTimeoutSecs must be at least 1"));
        }
        Ok(())
    }

    /// Save config to the data directory
    /// Preserves other settings that this crate doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = settings_path(data_dir);
        let mut settings = read_settings(&path)?;

        settings.database_file = Some(self.database_file.clone());
        settings.confirmation_holding_secs = Some(self.confirmation_holding.as_secs());
        settings.sweep_interval_secs = Some(self.sweep_interval.as_secs());
        settings.operation_timeout_secs = Some(self.operation_timeout.as_secs());
        settings.log_format = Some(self.log_format);

        std::fs::create_dir_all(data_dir)?;
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Full path of the database file
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.database_file)
    }
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

fn read_settings(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| Error::config(format!("invalid {}: {}", path.display(), e)))
}

fn secs_override(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match env(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| Error::config(format!("{} must be a whole number of seconds, got {:?}", key, value))),
        None => Ok(None),
    }
}
