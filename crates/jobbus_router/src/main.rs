//! `jobbus-router`: the broker process. Binds the frontend (clients +
//! schedulers) and backend (workers) ROUTER sockets and runs the routing
//! event loop until a clean shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use jobbus_logging::{init_logging, LogConfig};
use jobbus_router::{CliOverrides, Config, Router, ZmqTransport};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "jobbus-router", about = "Broker core for the job-execution message bus")]
struct Args {
    /// Path to a TOML config file. Missing is fine; defaults apply.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "JOBBUS_FRONTEND_ADDR")]
    frontend_addr: Option<String>,

    #[arg(long, env = "JOBBUS_BACKEND_ADDR")]
    backend_addr: Option<String>,

    #[arg(long, env = "JOBBUS_HEARTBEAT_INTERVAL")]
    heartbeat_interval: Option<u64>,

    #[arg(long, env = "JOBBUS_HEARTBEAT_TIMEOUT")]
    heartbeat_timeout: Option<u64>,

    #[arg(long)]
    disable_heartbeats: bool,

    #[arg(long, env = "JOBBUS_HWM")]
    hwm: Option<usize>,

    #[arg(long, env = "JOBBUS_WORKER_CLEANUP_INTERVAL")]
    worker_cleanup_interval: Option<u64>,

    #[arg(long, env = "JOBBUS_SCHEDULER_CLEANUP_INTERVAL")]
    scheduler_cleanup_interval: Option<u64>,

    #[arg(long, env = "JOBBUS_LOG_FILTER")]
    log_filter: Option<String>,

    /// Raise the console log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn cli_overrides(&self) -> CliOverrides {
        CliOverrides {
            frontend_addr: self.frontend_addr.clone(),
            backend_addr: self.backend_addr.clone(),
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            disable_heartbeats: self.disable_heartbeats.then_some(true),
            hwm: self.hwm,
            worker_cleanup_interval: self.worker_cleanup_interval,
            scheduler_cleanup_interval: self.scheduler_cleanup_interval,
            log_filter: self.log_filter.clone(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let initial_config = Config::load(args.config.as_deref(), &args.cli_overrides())?;
    init_logging(LogConfig {
        app_name: "jobbus-router",
        verbose: args.verbose,
        filter_override: initial_config.log_filter.as_deref(),
    })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let reload = Arc::new(AtomicBool::new(false));
    install_signal_handlers(shutdown.clone(), reload.clone())?;

    info!("jobbus-router starting");

    let mut next_config = Some(initial_config);
    loop {
        let config = match next_config.take() {
            Some(cfg) => cfg,
            None => Config::load(args.config.as_deref(), &args.cli_overrides())?,
        };
        info!(
            frontend = %config.frontend_addr,
            backend = %config.backend_addr,
            "binding broker endpoints"
        );
        let transport = ZmqTransport::bind(&config.frontend_addr, &config.backend_addr)?;
        let mut router = Router::new(config, transport);

        let mut reloading = false;
        while !router.shutdown_requested() {
            router.tick()?;
            if shutdown.swap(false, Ordering::SeqCst) {
                router.request_shutdown();
            }
            if reload.swap(false, Ordering::SeqCst) {
                info!("SIGHUP received, unbinding and reloading configuration");
                reloading = true;
                break;
            }
        }

        if !reloading {
            info!("jobbus-router shut down cleanly");
            return Ok(());
        }
        // `transport` and `router` drop here, unbinding both sockets before
        // the next iteration rebuilds them from a fresh config snapshot.
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
