//! Process-table backends.

mod sysinfo_source;
#[cfg(target_os = "linux")]
mod procfs_source;

pub use sysinfo_source::SysinfoSource;
#[cfg(target_os = "linux")]
pub use procfs_source::ProcfsSource;

use crate::config::Backend;
use crate::error::ConfigError;
use crate::process::ProcessSource;

/// Build the configured backend.
pub fn open(backend: Backend) -> Result<Box<dyn ProcessSource>, ConfigError> {
    match backend {
        Backend::Sysinfo => Ok(Box::new(SysinfoSource::new())),
        #[cfg(target_os = "linux")]
        Backend::Procfs => Ok(Box::new(ProcfsSource::new())),
        #[cfg(not(target_os = "linux"))]
        Backend::Procfs => Err(ConfigError::UnsupportedBackend("procfs")),
    }
}
