use crate::registry::TrackedProcess;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierAlert {
    pub pid: u32,
    pub z_score: f64,
    pub threshold: f64,
    pub latest: f64,
    pub mean: f64,
    pub std_dev: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl OutlierAlert {
    pub fn message(&self) -> String {
        format!(
            "ALERT: PID: {}, z-score {:.2} is greater than or equal to {} standard deviations from the mean",
            self.pid, self.z_score, self.threshold
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// History not yet full; detection deferred.
    WarmingUp { have: usize, need: usize },
    Normal { z_score: f64 },
    Outlier(OutlierAlert),
}

/// Flags the newest sample of a full window when its z-score reaches the threshold.
#[derive(Debug, Clone)]
pub struct OutlierDetector {
    threshold: f64,
}

impl OutlierDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn evaluate(&self, record: &TrackedProcess) -> Verdict {
        let window = &record.window;
        if !window.is_full() {
            return Verdict::WarmingUp {
                have: window.len(),
                need: window.capacity(),
            };
        }

        // Only a single-slot window can be full without a defined std dev
        let (Some(latest), Some(mean), Some(std_dev)) =
            (window.latest(), window.mean(), window.sample_std_dev())
        else {
            return Verdict::WarmingUp {
                have: window.len(),
                need: window.capacity().max(2),
            };
        };
        let z_score = window.z_score(latest).unwrap_or(0.0);

        if z_score >= self.threshold {
            Verdict::Outlier(OutlierAlert {
                pid: record.pid,
                z_score,
                threshold: self.threshold,
                latest,
                mean,
                std_dev,
                timestamp: chrono::Utc::now(),
            })
        } else {
            Verdict::Normal { z_score }
        }
    }

    /// The alert for `record`, if its newest sample is an outlier.
    pub fn check_outlier(&self, record: &TrackedProcess) -> Option<OutlierAlert> {
        match self.evaluate(record) {
            Verdict::Outlier(alert) => Some(alert),
            _ => None,
        }
    }
}

impl Default for OutlierDetector {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ZSCORE_THRESHOLD)
    }
}
