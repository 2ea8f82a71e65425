use crate::process::{ProcessSample, ProcessSource, SampleOutcome, SkipReason};
use procfs::process::Process;
use procfs::ProcError;
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct CpuTicks {
    start_time: u64,
    total_ticks: u64, // utime + stime
    taken_at: Instant,
}

/// Linux-only source reading `/proc` directly. Unlike sysinfo it can tell a
/// vanished process from one we are not allowed to read.
pub struct ProcfsSource {
    ticks_per_second: u64,
    previous: HashMap<u32, CpuTicks>,
}

impl ProcfsSource {
    pub fn new() -> Self {
        Self {
            ticks_per_second: procfs::ticks_per_second().max(1),
            previous: HashMap::new(),
        }
    }

    fn read_process(&mut self, process: &Process, now: Instant) -> SampleOutcome {
        let pid = process.pid as u32;

        let stat = match process.stat() {
            Ok(stat) => stat,
            Err(e) => return skipped(pid, &e),
        };
        if matches!(stat.state, 'Z' | 'X' | 'x') {
            return SampleOutcome::Skipped {
                pid,
                reason: SkipReason::Zombie,
            };
        }

        let args = match process.cmdline() {
            Ok(args) => args,
            Err(e) => return skipped(pid, &e),
        };

        let current = CpuTicks {
            start_time: stat.starttime,
            total_ticks: stat.utime + stat.stime,
            taken_at: now,
        };
        let cpu = match self.previous.insert(pid, current) {
            // A different start time means the pid was recycled
            Some(prev) if prev.start_time == current.start_time => cpu_percent(
                prev.total_ticks,
                current.total_ticks,
                now.duration_since(prev.taken_at).as_secs_f64(),
                self.ticks_per_second,
            ),
            _ => 0.0,
        };

        SampleOutcome::Sampled(ProcessSample::new(pid, &args, cpu))
    }
}

impl Default for ProcfsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for ProcfsSource {
    fn sample(&mut self) -> Vec<SampleOutcome> {
        let processes = match procfs::process::all_processes() {
            Ok(iter) => iter,
            Err(e) => {
                warn!("Failed to enumerate /proc: {}", e);
                return Vec::new();
            }
        };

        let now = Instant::now();
        let mut outcomes = Vec::new();
        for process in processes {
            match process {
                Ok(process) => outcomes.push(self.read_process(&process, now)),
                // The pid is unknown when the directory itself could not be opened
                Err(_) => continue,
            }
        }

        // Forget tick counters of processes that are gone
        let live: std::collections::HashSet<u32> = outcomes.iter().map(|o| o.pid()).collect();
        self.previous.retain(|pid, _| live.contains(pid));

        outcomes
    }

    fn name(&self) -> &'static str {
        "procfs"
    }
}

fn skipped(pid: u32, error: &ProcError) -> SampleOutcome {
    SampleOutcome::Skipped {
        pid,
        reason: classify(error),
    }
}

fn classify(error: &ProcError) -> SkipReason {
    match error {
        ProcError::NotFound(_) | ProcError::Incomplete(_) => SkipReason::Vanished,
        ProcError::PermissionDenied(_) => SkipReason::PermissionDenied,
        other => SkipReason::Unreadable(other.to_string()),
    }
}

/// CPU percentage of one core consumed between two readings.
pub(crate) fn cpu_percent(
    prev_ticks: u64,
    ticks: u64,
    elapsed_secs: f64,
    ticks_per_second: u64,
) -> f64 {
    if elapsed_secs <= 0.0 || ticks_per_second == 0 {
        return 0.0;
    }
    let cpu_seconds = ticks.saturating_sub(prev_ticks) as f64 / ticks_per_second as f64;
    cpu_seconds / elapsed_secs * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_percent_from_tick_delta() {
        // 150 ticks at 100 Hz over 3 seconds is half a core
        assert!((cpu_percent(1000, 1150, 3.0, 100) - 50.0).abs() < 1e-9);
        // two full cores
        assert!((cpu_percent(0, 600, 3.0, 100) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_percent_degenerate_inputs() {
        assert_eq!(cpu_percent(10, 20, 0.0, 100), 0.0);
        assert_eq!(cpu_percent(10, 20, 1.0, 0), 0.0);
        // counters going backwards never produce negative usage
        assert_eq!(cpu_percent(500, 100, 1.0, 100), 0.0);
    }

    #[test]
    fn errors_map_to_skip_reasons() {
        assert_eq!(classify(&ProcError::NotFound(None)), SkipReason::Vanished);
        assert_eq!(
            classify(&ProcError::PermissionDenied(None)),
            SkipReason::PermissionDenied
        );
        assert!(matches!(
            classify(&ProcError::Other("garbled stat".into())),
            SkipReason::Unreadable(_)
        ));
    }

    #[test]
    fn own_process_is_sampled() {
        let mut source = ProcfsSource::new();
        let me = std::process::id();
        let outcomes = source.sample();
        let mine = outcomes.iter().find(|o| o.pid() == me);
        match mine {
            Some(SampleOutcome::Sampled(sample)) => {
                assert!(!sample.command_line.is_empty());
                assert_eq!(sample.cpu_percent, 0.0);
            }
            other => panic!("expected own process to be sampled, got {:?}", other),
        }
    }

    #[test]
    fn second_pass_reports_usage_delta() {
        let mut source = ProcfsSource::new();
        let me = std::process::id();
        source.sample();

        let start = Instant::now();
        let mut x = 0u64;
        while start.elapsed().as_millis() < 200 {
            x = x.wrapping_add(1);
        }
        std::hint::black_box(x);

        let outcomes = source.sample();
        let usage = outcomes.iter().find_map(|o| match o {
            SampleOutcome::Sampled(s) if s.pid == me => Some(s.cpu_percent),
            _ => None,
        });
        assert!(usage.is_some_and(|cpu| cpu >= 0.0));
    }
}
