//! # Tracker configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file is valid.
//!
//! ```toml
//! [tracker]
//! snapshot_path = "/var/lib/printwatch/job_snapshots.json"
//! staleness_hours = 48
//! ratchet_tolerance_percent = 2.0
//! tracking_start_layer = 1
//! tracking_start_progress = 1.0
//!
//! [tracker.device_names]
//! "01S00A123456789" = "Workshop X1C"
//!
//! [logging]
//! level = "debug"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::consumption::TrackingThreshold;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.validate()?;
        self.logging.tracing_level()?;
        Ok(())
    }
}

/// Job tracker tunables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Open ledger jobs older than this are failed instead of resumed.
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: f64,
    /// Rejected remaining-percent increases up to this size are sensor jitter and only
    /// logged at debug level; larger ones are warnings.
    #[serde(default = "default_ratchet_tolerance")]
    pub ratchet_tolerance_percent: f64,
    #[serde(default = "default_tracking_start_layer")]
    pub tracking_start_layer: u32,
    #[serde(default = "default_tracking_start_progress")]
    pub tracking_start_progress: f64,
    /// Friendly names used in notifications, keyed by device identity.
    #[serde(default)]
    pub device_names: HashMap<String, String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            staleness_hours: default_staleness_hours(),
            ratchet_tolerance_percent: default_ratchet_tolerance(),
            tracking_start_layer: default_tracking_start_layer(),
            tracking_start_progress: default_tracking_start_progress(),
            device_names: HashMap::new(),
        }
    }
}

/// Upper bound for `staleness_hours` (100 years).
pub const MAX_STALENESS_HOURS: f64 = 876_600.0;

impl TrackerConfig {
    /// Staleness bound as a duration. Out-of-range values saturate instead of failing.
    pub fn staleness(&self) -> chrono::Duration {
        let millis = (self.staleness_hours.clamp(0.0, MAX_STALENESS_HOURS) * 3_600_000.0) as i64;
        chrono::Duration::try_milliseconds(millis).unwrap_or(chrono::Duration::MAX)
    }

    pub fn threshold(&self) -> TrackingThreshold {
        TrackingThreshold {
            min_layer: self.tracking_start_layer,
            min_progress: self.tracking_start_progress,
        }
    }

    pub fn device_name<'a>(&'a self, device_id: &'a str) -> &'a str {
        self.device_names.get(device_id).map(String::as_str).unwrap_or(device_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.staleness_hours > 0.0 && self.staleness_hours <= MAX_STALENESS_HOURS) {
            return Err(ConfigError::Invalid(format!(
                "tracker.staleness_hours must be > 0 and <= {}",
                MAX_STALENESS_HOURS
            )));
        }
        if !(self.ratchet_tolerance_percent >= 0.0 && self.ratchet_tolerance_percent.is_finite()) {
            return Err(ConfigError::Invalid("tracker.ratchet_tolerance_percent must be >= 0".to_string()));
        }
        if !(0.0..=100.0).contains(&self.tracking_start_progress) {
            return Err(ConfigError::Invalid(
                "tracker.tracking_start_progress must be between 0 and 100".to_string(),
            ));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("tracker.snapshot_path must not be empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl LoggingConfig {
    pub fn tracing_level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

// Default value functions
fn default_snapshot_path() -> PathBuf { PathBuf::from("job_snapshots.json") }
fn default_staleness_hours() -> f64 { 48.0 }
fn default_ratchet_tolerance() -> f64 { 2.0 }
fn default_tracking_start_layer() -> u32 { 1 }
fn default_tracking_start_progress() -> f64 { 1.0 }
fn default_log_level() -> String { "info".to_string() }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
