//! `jobbus-scheduler`: connects to the broker as a frontend peer and owns
//! cron/interval job firing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use jobbus_logging::{init_logging, LogConfig};
use jobbus_scheduler::{CliOverrides, Config, SchedulerRuntime, ZmqTransport};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jobbus-scheduler", about = "Cron and interval job runtime for the job-execution message bus")]
struct Args {
    /// Path to a TOML config file, including an optional `[[cron_jobs]]` table.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "JOBBUS_BROKER_ADDR")]
    broker_addr: Option<String>,

    #[arg(long, env = "JOBBUS_HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    #[arg(long, env = "JOBBUS_TICK_INTERVAL")]
    tick_interval: Option<u64>,

    #[arg(long, env = "JOBBUS_LOG_FILTER")]
    log_filter: Option<String>,

    /// Raise the console log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn cli_overrides(&self) -> CliOverrides {
        CliOverrides {
            broker_addr: self.broker_addr.clone(),
            heartbeat_interval: self.heartbeat_interval,
            tick_interval: self.tick_interval,
            log_filter: self.log_filter.clone(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (initial_config, initial_cron_jobs) = Config::load(args.config.as_deref(), &args.cli_overrides())?;
    init_logging(LogConfig {
        app_name: "jobbus-scheduler",
        verbose: args.verbose,
        filter_override: initial_config.log_filter.as_deref(),
    })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    install_signal_handlers(shutdown.clone(), reload.clone())?;

    info!("jobbus-scheduler starting");

    let mut next = Some((initial_config, initial_cron_jobs));
    loop {
        let (config, cron_jobs) = match next.take() {
            Some(loaded) => loaded,
            None => Config::load(args.config.as_deref(), &args.cli_overrides())?,
        };
        info!(broker = %config.broker_addr, cron_jobs = cron_jobs.len(), "connecting to broker");
        let transport = ZmqTransport::connect(&config.broker_addr)?;
        let mut runtime = SchedulerRuntime::new(config, transport, &cron_jobs)?;

        let mut reloading = false;
        while !runtime.shutdown_requested() {
            runtime.tick()?;
            if shutdown.swap(false, Ordering::SeqCst) {
                runtime.request_shutdown();
            }
            if reload.swap(false, Ordering::SeqCst) {
                info!("SIGHUP received, reconnecting with reloaded configuration");
                reloading = true;
                break;
            }
        }

        if !reloading {
            info!("jobbus-scheduler shut down cleanly");
            return Ok(());
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers(shutdown: Arc<AtomicBool>, reload: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGHUP {
                info!("received SIGHUP");
                reload.store(true, Ordering::SeqCst);
            } else {
                info!(signal = sig, "received shutdown signal");
                shutdown.store(true, Ordering::SeqCst);
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers(shutdown: Arc<AtomicBool>, _reload: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })?;
    Ok(())
}
