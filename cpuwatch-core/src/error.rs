use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("match_substring must not be empty")]
    EmptyPattern,

    #[error("window_size must be at least 2, got {0}")]
    WindowTooSmall(usize),

    #[error("alert_zscore_threshold must be a finite number, got {0}")]
    InvalidThreshold(f64),

    #[error("poll_interval_seconds must be a positive number of seconds that fits a duration, got {0}")]
    InvalidInterval(f64),

    #[error("evict_after_missed_ticks must be at least 1")]
    InvalidEviction,

    #[error("max_ticks must be at least 1")]
    InvalidTickLimit,

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("the {0} backend is not available on this platform")]
    UnsupportedBackend(&'static str),
}
