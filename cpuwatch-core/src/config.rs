//! Monitor configuration, loaded from TOML and overridden from the command line.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_WINDOW_SIZE: usize = 120;
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 2.0;
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sysinfo,
    Procfs,
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sysinfo" => Ok(Backend::Sysinfo),
            "procfs" | "proc" => Ok(Backend::Procfs),
            _ => Err(ConfigError::UnknownVariant {
                kind: "backend",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::UnknownVariant {
                kind: "output format",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Literal, case-sensitive substring of the command line to track.
    pub match_substring: String,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_zscore_threshold")]
    pub alert_zscore_threshold: f64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
    /// Emit a snapshot every N ticks; 0 disables snapshots.
    #[serde(default = "default_report_every")]
    pub report_every_ticks: u64,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub backend: Backend,
    /// Drop records not observed for this many consecutive ticks.
    /// Unset keeps every record for the lifetime of the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evict_after_missed_ticks: Option<u64>,
    /// Stop after this many ticks instead of running until signalled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ticks: Option<u64>,
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_zscore_threshold() -> f64 {
    DEFAULT_ZSCORE_THRESHOLD
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_report_every() -> u64 {
    1
}

impl MonitorConfig {
    pub fn new(match_substring: impl Into<String>) -> Self {
        Self {
            match_substring: match_substring.into(),
            window_size: DEFAULT_WINDOW_SIZE,
            alert_zscore_threshold: DEFAULT_ZSCORE_THRESHOLD,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            report_every_ticks: 1,
            output_format: OutputFormat::Text,
            backend: Backend::Sysinfo,
            evict_after_missed_ticks: None,
            max_ticks: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_substring.is_empty() {
            return Err(ConfigError::EmptyPattern);
        }
        if self.window_size < 2 {
            return Err(ConfigError::WindowTooSmall(self.window_size));
        }
        if !self.alert_zscore_threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold(self.alert_zscore_threshold));
        }
        // Rejects NaN, negatives, values that overflow or round down to zero
        match Duration::try_from_secs_f64(self.poll_interval_seconds) {
            Ok(interval) if !interval.is_zero() => {}
            _ => return Err(ConfigError::InvalidInterval(self.poll_interval_seconds)),
        }
        if self.evict_after_missed_ticks == Some(0) {
            return Err(ConfigError::InvalidEviction);
        }
        if self.max_ticks == Some(0) {
            return Err(ConfigError::InvalidTickLimit);
        }
        Ok(())
    }

    /// Falls back to the default interval when the configured value is out of range.
    pub fn poll_interval(&self) -> Duration {
        match Duration::try_from_secs_f64(self.poll_interval_seconds) {
            Ok(interval) if !interval.is_zero() => interval,
            _ => Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}
