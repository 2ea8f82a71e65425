pub mod alert;
pub mod config;
pub mod detector;
pub mod error;
pub mod monitor;
pub mod process;
pub mod registry;
pub mod report;
pub mod source;
pub mod window;


pub use alert::{AlertSink, ConsoleAlertSink, MemorySink};
pub use config::{Backend, MonitorConfig, OutputFormat};
pub use detector::{OutlierAlert, OutlierDetector, Verdict};
pub use error::ConfigError;
pub use monitor::{ProcessMonitor, TickSummary};
pub use process::{ProcessSample, ProcessSource, SampleOutcome, SkipReason};
pub use registry::{Registry, TrackedProcess};
pub use report::{ProcessHistory, Snapshot};
pub use window::SampleWindow;
