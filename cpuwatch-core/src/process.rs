use serde::{Deserialize, Serialize};
use std::fmt;

/// One CPU reading for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    /// Program path and arguments joined by single spaces.
    pub command_line: String,
    /// Utilisation since the previous pass, 0.0 on first observation.
    /// Not normalised by core count, so it can exceed 100.
    pub cpu_percent: f64,
}

impl ProcessSample {
    pub fn new(pid: u32, args: &[String], cpu_percent: f64) -> Self {
        Self {
            pid,
            command_line: args.join(" "),
            cpu_percent,
        }
    }

    /// Case-sensitive literal substring match on the full command line.
    pub fn matches(&self, pattern: &str) -> bool {
        self.command_line.contains(pattern)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SkipReason {
    /// Exited between enumeration and the read.
    Vanished,
    PermissionDenied,
    Zombie,
    Unreadable(String),
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::Vanished => "vanished",
            SkipReason::PermissionDenied => "permission_denied",
            SkipReason::Zombie => "zombie",
            SkipReason::Unreadable(_) => "unreadable",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable(detail) => write!(f, "unreadable: {}", detail),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of reading a single process during a pass over the process table.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Sampled(ProcessSample),
    Skipped { pid: u32, reason: SkipReason },
}

impl SampleOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            SampleOutcome::Sampled(sample) => sample.pid,
            SampleOutcome::Skipped { pid, .. } => *pid,
        }
    }
}

/// A view of the OS process table.
pub trait ProcessSource {
    /// Enumerate every visible process once. Per-process failures come back
    /// as `Skipped` outcomes rather than errors.
    fn sample(&mut self) -> Vec<SampleOutcome>;

    fn name(&self) -> &'static str;
}

impl<S: ProcessSource + ?Sized> ProcessSource for Box<S> {
    fn sample(&mut self) -> Vec<SampleOutcome> {
        (**self).sample()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
