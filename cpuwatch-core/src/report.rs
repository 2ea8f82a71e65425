use crate::config::OutputFormat;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessHistory {
    pub pid: u32,
    pub first_seen_tick: u64,
    pub samples: Vec<f64>,
}

/// Every tracked pid with its current history, oldest sample first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u64,
    pub taken_at: chrono::DateTime<chrono::Utc>,
    pub processes: Vec<ProcessHistory>,
}

impl Snapshot {
    pub fn capture(registry: &Registry, tick: u64) -> Self {
        Self {
            tick,
            taken_at: chrono::Utc::now(),
            processes: registry
                .iter()
                .map(|record| ProcessHistory {
                    pid: record.pid,
                    first_seen_tick: record.first_seen_tick,
                    samples: record.window.to_vec(),
                })
                .collect(),
        }
    }

    /// `All tracked: [[pid, [s1, s2, ...]], ...]`
    pub fn to_text(&self) -> String {
        let mut line = String::from("All tracked: [");
        for (i, process) in self.processes.iter().enumerate() {
            if i > 0 {
                line.push_str(", ");
            }
            let _ = write!(line, "[{}, [", process.pid);
            for (j, sample) in process.samples.iter().enumerate() {
                if j > 0 {
                    line.push_str(", ");
                }
                let _ = write!(line, "{:?}", sample);
            }
            line.push_str("]]");
        }
        line.push(']');
        line
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        Ok(match format {
            OutputFormat::Text => self.to_text(),
            OutputFormat::Json => serde_json::to_string(self)?,
        })
    }
}
