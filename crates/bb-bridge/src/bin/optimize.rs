//! Optimizer process: reads a config, drives the selected algorithm against
//! an external evaluator through the handshake file, and publishes the best
//! point with `OptiFinish`.
//!
//! Usage:
//!   bb-optimize <CONFIG> <PARENT_PID> [--report <PATH>]
//!   RUST_LOG=debug bb-optimize opt_config.txt 4711

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bb_bridge::{BlackboxBridge, BridgeConfig, ParentWatchdog, WatchdogConfig, WatchdogHandle};
use bb_optimizer::OptimizationDriver;
use bb_types::{internal_error, load_config, BbError, ConfigError, RunReport};

const EXIT_USAGE: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_PROTOCOL: i32 = 3;
const EXIT_FAILURE: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "bb-optimize")]
#[command(about = "Minimize a black-box objective evaluated by another process over a handshake file")]
struct Args {
    /// Path to the key: value optimizer config file
    config: PathBuf,

    /// Process id of the launching process; the optimizer exits when it is gone
    parent_pid: u32,

    /// Write a JSON run report here after the final result is published
    #[arg(long, value_name = "PATH")]
    report: Option<PathBuf>,

    /// Parent liveness poll interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    watchdog_interval_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            println!("{}", Args::command().render_usage());
            eprintln!("{}", e.render());
            process::exit(EXIT_USAGE);
        }
    };

    let _watchdog = match start_watchdog(&args) {
        Ok(handle) => handle,
        Err(e) => exit_with(e),
    };

    if let Err(e) = run(&args) {
        exit_with(e);
    }
}

fn start_watchdog(args: &Args) -> anyhow::Result<WatchdogHandle> {
    let config = WatchdogConfig::new(args.parent_pid)
        .with_interval(Duration::from_millis(args.watchdog_interval_ms));
    ParentWatchdog::new(config)
        .spawn_terminating()
        .map_err(|e| internal_error!("cannot watch parent process {}: {}", args.parent_pid, e).into())
}

fn run(args: &Args) -> anyhow::Result<()> {
    let spec = load_config(&args.config).map_err(BbError::from)?;
    if !spec.handshake_dir.is_dir() {
        return Err(BbError::from(ConfigError::MissingDirectory {
            path: spec.handshake_dir.display().to_string(),
        })
        .into());
    }
    let driver = OptimizationDriver::new(&spec)?;

    let mut report = RunReport::start(&spec);
    info!(run_id = %report.run_id, config = %args.config.display(), "Optimizer started");

    let mut bridge = BlackboxBridge::new(BridgeConfig::from_spec(&spec));
    let result = match driver.run(&mut bridge) {
        Ok(result) => result,
        Err(e) => {
            report.mark_failed(e.to_string());
            if let Some(path) = &args.report {
                write_report(path, &report);
            }
            return Err(e.into());
        }
    };

    bridge.finalize(result.best_vars.clone());
    report.mark_completed(result);
    info!(
        run_id = %report.run_id,
        elapsed_seconds = report.elapsed_seconds().unwrap_or_default(),
        "Optimizer finished"
    );

    if let Some(path) = &args.report {
        write_report(path, &report);
    }
    Ok(())
}

/// The final result is already published when this runs, so a failure here
/// is logged but does not change the exit status.
fn write_report(path: &Path, report: &RunReport) {
    match report.write_json(path) {
        Ok(()) => info!(path = %path.display(), "Run report written"),
        Err(e) => warn!(path = %path.display(), "Failed to write run report: {}", e),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BbError>() {
        Some(e) if e.is_configuration() => EXIT_CONFIG,
        Some(e) if e.is_protocol_violation() => EXIT_PROTOCOL,
        _ => EXIT_FAILURE,
    }
}

fn exit_with(err: anyhow::Error) -> ! {
    eprintln!("bb-optimize: {:#}", err);
    process::exit(exit_code(&err))
}
