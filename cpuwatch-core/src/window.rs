use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity FIFO of metric samples. Pushing onto a full window evicts
/// the oldest sample in O(1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, returning the evicted one if the window was full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(value);
        evicted
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// True when every sample holds the same value.
    pub fn is_constant(&self) -> bool {
        let mut iter = self.samples.iter();
        match iter.next() {
            Some(first) => iter.all(|v| v == first),
            None => true,
        }
    }

    /// Sample standard deviation (divisor n - 1). Undefined below two samples.
    /// Exactly 0.0 for a constant window, whatever rounding the mean picks up.
    pub fn sample_std_dev(&self) -> Option<f64> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        if self.is_constant() {
            return Some(0.0);
        }
        let mean = self.mean()?;
        let sum_sq: f64 = self.samples.iter().map(|v| (v - mean).powi(2)).sum();
        Some((sum_sq / (n - 1) as f64).sqrt())
    }

    /// Distance of `value` from the window mean in sample standard deviations.
    /// A window without variance scores every value as 0.0.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let mean = self.mean()?;
        let std_dev = self.sample_std_dev()?;
        if std_dev == 0.0 {
            return Some(0.0);
        }
        Some((value - mean) / std_dev)
    }
}
