//! cpuwatch: alert when a process's CPU usage jumps away from its own recent history.

use anyhow::{Context, Result};
use clap::Parser;
use cpuwatch_core::{source, Backend, ConsoleAlertSink, MonitorConfig, OutputFormat, ProcessMonitor};
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Track the CPU usage of every process whose command line contains PATTERN
/// and alert when the newest sample is a statistical outlier.
#[derive(Parser, Debug)]
#[command(name = "cpuwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Examples:

    Watch security_passthrough with the defaults (120 samples, z >= 2, every 30s):

        cpuwatch security_passthrough

    Faster sampling, stricter threshold, JSON output, forget exited pids:

        cpuwatch -i 5 -t 3 --format json --evict-after 10 'java -jar gateway'")]
struct Args {
    /// Literal, case-sensitive substring of the command line to track.
    pattern: Option<String>,

    /// TOML config file; command-line flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Samples kept per process; detection starts once the window is full.
    #[arg(short, long)]
    window_size: Option<usize>,

    /// Alert when the newest sample's z-score is at or above this value.
    #[arg(short = 't', long = "threshold")]
    threshold: Option<f64>,

    /// Seconds between ticks.
    #[arg(short, long = "interval")]
    interval: Option<f64>,

    /// Print the tracked histories every N ticks (0 disables).
    #[arg(long = "report-every", value_name = "N")]
    report_every: Option<u64>,

    /// Output format for alerts and reports: text or json.
    #[arg(long)]
    format: Option<OutputFormat>,

    /// Process table backend: sysinfo or procfs (Linux only).
    #[arg(long)]
    backend: Option<Backend>,

    /// Forget processes not seen for N consecutive ticks.
    #[arg(long = "evict-after", value_name = "N")]
    evict_after: Option<u64>,

    /// Exit after N ticks instead of running until signalled.
    #[arg(long = "ticks", value_name = "N")]
    ticks: Option<u64>,

    /// More log output on stderr (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn build_config(args: &Args) -> Result<MonitorConfig> {
    let mut config = match (&args.config, &args.pattern) {
        (Some(path), _) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        (None, Some(pattern)) => MonitorConfig::new(pattern.clone()),
        (None, None) => anyhow::bail!("a PATTERN argument or a --config file is required"),
    };

    if let Some(pattern) = &args.pattern {
        config.match_substring = pattern.clone();
    }
    if let Some(window_size) = args.window_size {
        config.window_size = window_size;
    }
    if let Some(threshold) = args.threshold {
        config.alert_zscore_threshold = threshold;
    }
    if let Some(interval) = args.interval {
        config.poll_interval_seconds = interval;
    }
    if let Some(every) = args.report_every {
        config.report_every_ticks = every;
    }
    if let Some(format) = args.format {
        config.output_format = format;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if args.evict_after.is_some() {
        config.evict_after_missed_ticks = args.evict_after;
    }
    if args.ticks.is_some() {
        config.max_ticks = args.ticks;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stdout carries alerts and reports; logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = build_config(&args)?;
    let source = source::open(config.backend).context("Failed to open process source")?;
    let sink = ConsoleAlertSink::stdout(config.output_format);

    let mut monitor = ProcessMonitor::new(config, source, sink);
    monitor.run(std::io::stdout(), shutdown_signal()).await;

    Ok(())
}
