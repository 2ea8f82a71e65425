use crate::alert::AlertSink;
use crate::config::MonitorConfig;
use crate::detector::OutlierDetector;
use crate::process::{ProcessSource, SampleOutcome};
use crate::registry::Registry;
use crate::report::Snapshot;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::io::Write;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick: u64,
    /// Outcomes returned by the source, sampled or skipped.
    pub seen: usize,
    pub matched: usize,
    pub skipped: BTreeMap<&'static str, usize>,
    pub alerts: usize,
    pub evicted: Vec<u32>,
}

impl TickSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Sense-and-alert loop over one process source. Owns all of its state.
pub struct ProcessMonitor<S, A> {
    config: MonitorConfig,
    source: S,
    sink: A,
    registry: Registry,
    detector: OutlierDetector,
    excluded: HashSet<u32>,
    tick: u64,
}

impl<S: ProcessSource, A: AlertSink> ProcessMonitor<S, A> {
    pub fn new(config: MonitorConfig, source: S, sink: A) -> Self {
        // Our own argv carries the pattern. A wrapping shell's does too, but it
        // may be the very process being watched, so callers exclude it explicitly.
        let excluded = HashSet::from([nix::unistd::getpid().as_raw() as u32]);

        Self {
            detector: OutlierDetector::new(config.alert_zscore_threshold),
            config,
            source,
            sink,
            registry: Registry::new(),
            excluded,
            tick: 0,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn sink(&self) -> &A {
        &self.sink
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn excluded_pids(&self) -> &HashSet<u32> {
        &self.excluded
    }

    /// Replace the set of pids that are never tracked.
    pub fn set_excluded_pids(&mut self, pids: impl IntoIterator<Item = u32>) {
        self.excluded = pids.into_iter().collect();
    }

    /// Enumerate, sample, record and check every matching process once.
    pub fn sample_tick(&mut self) -> TickSummary {
        self.tick += 1;
        let tick = self.tick;
        let mut summary = TickSummary {
            tick,
            ..Default::default()
        };

        for outcome in self.source.sample() {
            summary.seen += 1;

            let sample = match outcome {
                SampleOutcome::Sampled(sample) => sample,
                SampleOutcome::Skipped { pid, reason } => {
                    trace!(pid, %reason, "Skipping process");
                    *summary.skipped.entry(reason.label()).or_default() += 1;
                    continue;
                }
            };

            if self.excluded.contains(&sample.pid) || !sample.matches(&self.config.match_substring) {
                continue;
            }
            summary.matched += 1;

            let record = self.registry.observe(
                sample.pid,
                sample.cpu_percent,
                self.config.window_size,
                tick,
            );
            if let Some(alert) = self.detector.check_outlier(record) {
                self.sink.emit(&alert);
                summary.alerts += 1;
            }
        }

        if let Some(max_missed) = self.config.evict_after_missed_ticks {
            summary.evicted = self.registry.evict_idle(tick, max_missed);
        }

        debug!(
            tick,
            seen = summary.seen,
            matched = summary.matched,
            skipped = summary.skipped_total(),
            alerts = summary.alerts,
            tracked = self.registry.len(),
            "Tick complete"
        );
        summary
    }

    pub fn report_snapshot(&self) -> Snapshot {
        Snapshot::capture(&self.registry, self.tick)
    }

    fn should_report(&self) -> bool {
        let every = self.config.report_every_ticks;
        every > 0 && self.tick % every == 0
    }

    fn write_report<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let line = self.report_snapshot().render(self.config.output_format)?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }

    /// Tick, report and sleep until `shutdown` resolves or `max_ticks` is
    /// reached. Returns the number of ticks performed by this call.
    pub async fn run<W, F>(&mut self, mut report_out: W, shutdown: F) -> u64
    where
        W: Write,
        F: Future<Output = ()>,
    {
        info!(
            pattern = %self.config.match_substring,
            source = self.source.name(),
            window = self.config.window_size,
            threshold = self.config.alert_zscore_threshold,
            interval_secs = self.config.poll_interval_seconds,
            "Monitor starting"
        );

        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut performed = 0;

        loop {
            if self.config.max_ticks.is_some_and(|max| performed >= max) {
                info!(ticks = performed, "Tick limit reached");
                break;
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {}
            }

            self.sample_tick();
            performed += 1;

            if self.should_report() {
                if let Err(e) = self.write_report(&mut report_out) {
                    error!("Failed to write snapshot: {}", e);
                }
            }
        }

        info!(ticks = performed, tracked = self.registry.len(), "Monitor stopped");
        performed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemorySink;
    use crate::config::OutputFormat;
    use crate::process::{ProcessSample, SkipReason};
    use std::collections::VecDeque;

    /// Replays canned passes over the process table, then reports nothing.
    struct ScriptedSource {
        passes: VecDeque<Vec<SampleOutcome>>,
    }

    impl ScriptedSource {
        fn new(passes: Vec<Vec<SampleOutcome>>) -> Self {
            Self {
                passes: passes.into(),
            }
        }
    }

    impl ProcessSource for ScriptedSource {
        fn sample(&mut self) -> Vec<SampleOutcome> {
            self.passes.pop_front().unwrap_or_default()
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn sampled(pid: u32, cmd: &str, cpu: f64) -> SampleOutcome {
        SampleOutcome::Sampled(ProcessSample {
            pid,
            command_line: cmd.to_string(),
            cpu_percent: cpu,
        })
    }

    fn config(window: usize) -> MonitorConfig {
        let mut config = MonitorConfig::new("security_passthrough");
        config.window_size = window;
        config
    }

    fn monitor(
        config: MonitorConfig,
        passes: Vec<Vec<SampleOutcome>>,
    ) -> ProcessMonitor<ScriptedSource, MemorySink> {
        let mut monitor = ProcessMonitor::new(config, ScriptedSource::new(passes), MemorySink::new());
        monitor.set_excluded_pids(std::iter::empty());
        monitor
    }

    const CMD: &str = "/opt/sp/bin/security_passthrough --listen 0.0.0.0:443";

    #[test]
    fn excludes_own_process_by_default() {
        let me = std::process::id();
        let mut m = ProcessMonitor::new(
            config(2),
            ScriptedSource::new(vec![vec![sampled(me, CMD, 1.0)]]),
            MemorySink::new(),
        );
        assert!(m.excluded_pids().contains(&me));
        let summary = m.sample_tick();
        assert_eq!(summary.matched, 0);
        assert!(m.registry().is_empty());
    }

    #[test]
    fn parent_process_is_tracked_by_default() {
        let parent = nix::unistd::getppid().as_raw() as u32;
        let mut m = ProcessMonitor::new(
            config(2),
            ScriptedSource::new(vec![vec![sampled(parent, CMD, 1.0)]]),
            MemorySink::new(),
        );
        assert_eq!(m.excluded_pids().len(), 1);
        assert!(!m.excluded_pids().contains(&parent));
        assert_eq!(m.sample_tick().matched, 1);
        assert!(m.registry().get(parent).is_some());

        m.set_excluded_pids([parent]);
        assert!(m.excluded_pids().contains(&parent));
    }

    #[test]
    fn non_matching_processes_are_never_tracked() {
        let passes = vec![vec![
            sampled(10, "/usr/sbin/sshd -D", 99.0),
            sampled(11, "/opt/sp/bin/Security_Passthrough", 99.0),
            sampled(12, CMD, 1.0),
        ]];
        let mut m = monitor(config(2), passes);
        let summary = m.sample_tick();

        assert_eq!(summary.seen, 3);
        assert_eq!(summary.matched, 1);
        assert_eq!(m.registry().len(), 1);
        assert!(m.registry().get(12).is_some());
    }

    #[test]
    fn spike_alerts_once_window_is_full() {
        let mut passes: Vec<Vec<SampleOutcome>> = (0..119).map(|_| vec![sampled(77, CMD, 50.0)]).collect();
        passes.push(vec![sampled(77, CMD, 100.0)]);
        let mut m = monitor(config(120), passes);

        for _ in 0..119 {
            assert_eq!(m.sample_tick().alerts, 0);
        }
        let summary = m.sample_tick();
        assert_eq!(summary.alerts, 1);

        let alert = &m.sink().alerts[0];
        assert_eq!(alert.pid, 77);
        assert!(alert.z_score > 2.0);
    }

    #[test]
    fn spike_during_warm_up_is_ignored() {
        let passes = vec![
            vec![sampled(5, CMD, 0.0)],
            vec![sampled(5, CMD, 0.0)],
            vec![sampled(5, CMD, 500.0)],
        ];
        let mut m = monitor(config(4), passes);
        for _ in 0..3 {
            m.sample_tick();
        }
        assert!(m.sink().alerts.is_empty());
    }

    #[test]
    fn constant_usage_never_alerts() {
        let passes = (0..150).map(|_| vec![sampled(9, CMD, 50.0)]).collect();
        let mut m = monitor(config(120), passes);
        for _ in 0..150 {
            m.sample_tick();
        }
        assert!(m.sink().alerts.is_empty());
        assert_eq!(m.registry().get(9).unwrap().window.len(), 120);
    }

    #[test]
    fn skipped_processes_leave_records_untouched() {
        let passes = vec![
            vec![sampled(1, CMD, 3.0), sampled(2, CMD, 4.0)],
            vec![
                SampleOutcome::Skipped { pid: 1, reason: SkipReason::PermissionDenied },
                SampleOutcome::Skipped { pid: 3, reason: SkipReason::Zombie },
                sampled(2, CMD, 5.0),
            ],
            vec![SampleOutcome::Skipped { pid: 2, reason: SkipReason::Vanished }],
        ];
        let mut m = monitor(config(10), passes);

        m.sample_tick();
        let second = m.sample_tick();
        assert_eq!(second.skipped.get("permission_denied"), Some(&1));
        assert_eq!(second.skipped.get("zombie"), Some(&1));
        assert_eq!(second.skipped_total(), 2);

        let third = m.sample_tick();
        assert_eq!(third.skipped.get("vanished"), Some(&1));

        assert_eq!(m.registry().get(1).unwrap().window.to_vec(), vec![3.0]);
        assert_eq!(m.registry().get(2).unwrap().window.to_vec(), vec![4.0, 5.0]);
    }

    #[test]
    fn registry_never_shrinks_without_eviction() {
        let passes = vec![
            vec![sampled(1, CMD, 1.0), sampled(2, CMD, 1.0)],
            vec![sampled(2, CMD, 1.0)],
            vec![],
            vec![sampled(3, CMD, 1.0)],
        ];
        let mut m = monitor(config(5), passes);
        let mut last_len = 0;
        for _ in 0..4 {
            m.sample_tick();
            assert!(m.registry().len() >= last_len);
            last_len = m.registry().len();
        }
        assert_eq!(last_len, 3);
        assert_eq!(m.registry().get(1).unwrap().last_seen_tick, 1);
    }

    #[test]
    fn idle_records_are_evicted_when_configured() {
        let mut cfg = config(5);
        cfg.evict_after_missed_ticks = Some(2);
        let passes = vec![
            vec![sampled(1, CMD, 1.0), sampled(2, CMD, 1.0)],
            vec![sampled(2, CMD, 1.0)],
            vec![sampled(2, CMD, 1.0)],
            vec![sampled(2, CMD, 1.0)],
        ];
        let mut m = monitor(cfg, passes);

        assert!(m.sample_tick().evicted.is_empty());
        assert!(m.sample_tick().evicted.is_empty());
        assert!(m.sample_tick().evicted.is_empty());
        assert_eq!(m.sample_tick().evicted, vec![1]);
        assert!(m.registry().get(1).is_none());
        assert!(m.registry().get(2).is_some());
    }

    #[test]
    fn snapshot_reflects_registry() {
        let passes = vec![vec![sampled(8, CMD, 2.0)], vec![sampled(8, CMD, 4.0)]];
        let mut m = monitor(config(3), passes);
        m.sample_tick();
        m.sample_tick();

        let snapshot = m.report_snapshot();
        assert_eq!(snapshot.tick, 2);
        assert_eq!(snapshot.processes.len(), 1);
        assert_eq!(snapshot.processes[0].samples, vec![2.0, 4.0]);
    }

    #[tokio::test]
    async fn run_stops_at_tick_limit_and_reports_each_tick() {
        let mut cfg = config(3);
        cfg.poll_interval_seconds = 0.01;
        cfg.max_ticks = Some(3);
        let passes = (0..3).map(|i| vec![sampled(8, CMD, i as f64)]).collect();
        let mut m = monitor(cfg, passes);

        let mut out = Vec::new();
        let ticks = m.run(&mut out, std::future::pending()).await;
        assert_eq!(ticks, 3);

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "All tracked: [[8, [0.0, 1.0, 2.0]]]");
    }

    #[tokio::test]
    async fn run_honours_report_cadence_and_format() {
        let mut cfg = config(3);
        cfg.poll_interval_seconds = 0.01;
        cfg.max_ticks = Some(4);
        cfg.report_every_ticks = 2;
        cfg.output_format = OutputFormat::Json;
        let mut m = monitor(cfg, vec![]);

        let mut out = Vec::new();
        m.run(&mut out, std::future::pending()).await;

        let out = String::from_utf8(out).unwrap();
        let ticks: Vec<u64> = out
            .lines()
            .map(|line| serde_json::from_str::<Snapshot>(line).unwrap().tick)
            .collect();
        assert_eq!(ticks, vec![2, 4]);
    }

    #[tokio::test]
    async fn run_with_zero_tick_limit_samples_nothing() {
        let mut cfg = config(3);
        cfg.max_ticks = Some(0);
        let mut m = monitor(cfg, vec![vec![sampled(8, CMD, 1.0)]]);

        let mut out = Vec::new();
        let ticks = m.run(&mut out, std::future::pending()).await;
        assert_eq!(ticks, 0);
        assert_eq!(m.ticks(), 0);
        assert!(m.registry().is_empty());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn run_returns_on_shutdown() {
        let mut m = monitor(config(3), vec![vec![sampled(8, CMD, 1.0)]]);
        let mut out = Vec::new();
        let ticks = m.run(&mut out, std::future::ready(())).await;
        assert_eq!(ticks, 0);
        assert!(out.is_empty());
    }
}
