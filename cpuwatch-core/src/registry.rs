use crate::window::SampleWindow;
use std::collections::BTreeMap;
use tracing::debug;

/// History kept for one matching process.
#[derive(Debug, Clone)]
pub struct TrackedProcess {
    pub pid: u32,
    pub window: SampleWindow,
    pub first_seen_tick: u64,
    pub last_seen_tick: u64,
}

impl TrackedProcess {
    fn new(pid: u32, capacity: usize, tick: u64) -> Self {
        Self {
            pid,
            window: SampleWindow::new(capacity),
            first_seen_tick: tick,
            last_seen_tick: tick,
        }
    }
}

/// Every process tracked during this run, keyed by pid.
#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<u32, TrackedProcess>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample, creating the entry on first observation.
    pub fn observe(&mut self, pid: u32, value: f64, capacity: usize, tick: u64) -> &TrackedProcess {
        let record = self
            .records
            .entry(pid)
            .or_insert_with(|| TrackedProcess::new(pid, capacity, tick));
        record.window.push(value);
        record.last_seen_tick = tick;
        record
    }

    /// Remove records whose last observation is more than `max_missed`
    /// ticks behind `current_tick`. Returns the evicted pids.
    pub fn evict_idle(&mut self, current_tick: u64, max_missed: u64) -> Vec<u32> {
        let mut evicted = Vec::new();
        self.records.retain(|pid, record| {
            let missed = current_tick.saturating_sub(record.last_seen_tick);
            if missed > max_missed {
                debug!(pid, missed, "Evicting idle process record");
                evicted.push(*pid);
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn get(&self, pid: u32) -> Option<&TrackedProcess> {
        self.records.get(&pid)
    }

    /// Records in ascending pid order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedProcess> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
