use crate::process::{ProcessSample, ProcessSource, SampleOutcome, SkipReason};
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// Portable process source. The `System` is kept between passes so that
/// `cpu_usage()` reports utilisation since the previous refresh.
pub struct SysinfoSource {
    system: System,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn refresh(&mut self) {
        // Dead processes must be dropped, otherwise exited pids linger with stale usage.
        // The command line is re-read every pass: exec and retitled argv change it.
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new()
                .with_cpu()
                .with_cmd(UpdateKind::Always),
        );
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoSource {
    fn sample(&mut self) -> Vec<SampleOutcome> {
        self.refresh();

        let real_pids = list_proc_pids();
        let mut outcomes = Vec::with_capacity(self.system.processes().len());

        for (pid, process) in self.system.processes() {
            let pid = pid.as_u32();

            // sysinfo reports Linux threads as processes; keep only /proc entries
            if let Some(real_pids) = &real_pids {
                if !real_pids.contains(&pid) {
                    continue;
                }
            }

            if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                outcomes.push(SampleOutcome::Skipped {
                    pid,
                    reason: SkipReason::Zombie,
                });
                continue;
            }

            let args: Vec<String> = process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect();
            outcomes.push(SampleOutcome::Sampled(ProcessSample::new(
                pid,
                &args,
                f64::from(process.cpu_usage()),
            )));
        }

        outcomes
    }

    fn name(&self) -> &'static str {
        "sysinfo"
    }
}

#[cfg(target_os = "linux")]
fn list_proc_pids() -> Option<std::collections::HashSet<u32>> {
    let processes = procfs::process::all_processes().ok()?;
    Some(
        processes
            .flatten()
            .map(|process| process.pid as u32)
            .collect(),
    )
}

#[cfg(not(target_os = "linux"))]
fn list_proc_pids() -> Option<std::collections::HashSet<u32>> {
    None
}
