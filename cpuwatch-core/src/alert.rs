use crate::config::OutputFormat;
use crate::detector::OutlierAlert;
use std::io::{self, Write};
use tracing::{error, warn};

/// Destination for outlier notifications.
pub trait AlertSink {
    fn emit(&mut self, alert: &OutlierAlert);
}

/// Writes one line per alert, as text or as a JSON object.
pub struct ConsoleAlertSink<W: Write> {
    out: W,
    format: OutputFormat,
}

impl ConsoleAlertSink<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> ConsoleAlertSink<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, alert: &OutlierAlert) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "{}", alert.message())?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, alert)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> AlertSink for ConsoleAlertSink<W> {
    fn emit(&mut self, alert: &OutlierAlert) {
        warn!(
            pid = alert.pid,
            z_score = alert.z_score,
            latest = alert.latest,
            mean = alert.mean,
            "CPU usage outlier"
        );
        if let Err(e) = self.write_line(alert) {
            error!("Failed to write alert for PID {}: {}", alert.pid, e);
        }
    }
}

/// Keeps alerts in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub alerts: Vec<OutlierAlert>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertSink for MemorySink {
    fn emit(&mut self, alert: &OutlierAlert) {
        self.alerts.push(alert.clone());
    }
}

impl<A: AlertSink + ?Sized> AlertSink for &mut A {
    fn emit(&mut self, alert: &OutlierAlert) {
        (**self).emit(alert)
    }
}
