//! Immutable configuration snapshot, layered file < env < CLI.
//!
//! A fresh snapshot is built the same way at startup and on SIGHUP; nothing
//! here is ever mutated in place.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_FRONTEND_ADDR: &str = "tcp://0.0.0.0:7830";
const DEFAULT_BACKEND_ADDR: &str = "tcp://0.0.0.0:7831";
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_HWM: usize = 10_000;
const DEFAULT_WORKER_CLEANUP_INTERVAL_SECS: u64 = 10;
const DEFAULT_SCHEDULER_CLEANUP_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub frontend_addr: String,
    pub backend_addr: String,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub disable_heartbeats: bool,
    pub hwm: usize,
    pub worker_cleanup_interval: Duration,
    pub scheduler_cleanup_interval: Duration,
    /// `tracing_subscriber::EnvFilter` directive string. `None` defers to
    /// `RUST_LOG` or `jobbus_logging`'s own default. Applied once at
    /// startup; a later SIGHUP reload re-reads it but cannot retroactively
    /// change an already-initialized subscriber.
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            frontend_addr: DEFAULT_FRONTEND_ADDR.to_string(),
            backend_addr: DEFAULT_BACKEND_ADDR.to_string(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            disable_heartbeats: false,
            hwm: DEFAULT_HWM,
            worker_cleanup_interval: Duration::from_secs(DEFAULT_WORKER_CLEANUP_INTERVAL_SECS),
            scheduler_cleanup_interval: Duration::from_secs(DEFAULT_SCHEDULER_CLEANUP_INTERVAL_SECS),
            log_filter: None,
        }
    }
}

/// The subset of config a file may carry. Every field is optional so a
/// partial file only overrides what it names.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    frontend_addr: Option<String>,
    backend_addr: Option<String>,
    heartbeat_interval: Option<u64>,
    heartbeat_timeout: Option<u64>,
    disable_heartbeats: Option<bool>,
    hwm: Option<usize>,
    worker_cleanup_interval: Option<u64>,
    scheduler_cleanup_interval: Option<u64>,
    log_filter: Option<String>,
}

/// Overrides supplied on the command line; `None` means "not given, fall
/// through to the next layer".
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub frontend_addr: Option<String>,
    pub backend_addr: Option<String>,
    pub heartbeat_interval: Option<u64>,
    pub heartbeat_timeout: Option<u64>,
    pub disable_heartbeats: Option<bool>,
    pub hwm: Option<usize>,
    pub worker_cleanup_interval: Option<u64>,
    pub scheduler_cleanup_interval: Option<u64>,
    pub log_filter: Option<String>,
}

impl Config {
    /// Load a config snapshot: start from defaults, apply the TOML file (if
    /// it exists), then `JOBBUS_*` environment variables, then CLI flags.
    /// Each layer only overrides fields it actually names.
    pub fn load(file_path: Option<&Path>, cli: &CliOverrides) -> Result<Config> {
        let mut cfg = Config::default();

        if let Some(path) = file_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                let file: FileConfig = toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?;
                apply_file(&mut cfg, file);
            }
        }

        apply_env(&mut cfg).context("failed to apply JOBBUS_* environment overrides")?;
        apply_cli(&mut cfg, cli);

        Ok(cfg)
    }
}

fn apply_file(cfg: &mut Config, file: FileConfig) {
    if let Some(v) = file.frontend_addr {
        cfg.frontend_addr = v;
    }
    if let Some(v) = file.backend_addr {
        cfg.backend_addr = v;
    }
    if let Some(v) = file.heartbeat_interval {
        cfg.heartbeat_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.heartbeat_timeout {
        cfg.heartbeat_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file.disable_heartbeats {
        cfg.disable_heartbeats = v;
    }
    if let Some(v) = file.hwm {
        cfg.hwm = v;
    }
    if let Some(v) = file.worker_cleanup_interval {
        cfg.worker_cleanup_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.scheduler_cleanup_interval {
        cfg.scheduler_cleanup_interval = Duration::from_secs(v);
    }
    if let Some(v) = file.log_filter {
        cfg.log_filter = Some(v);
    }
}

fn apply_env(cfg: &mut Config) -> Result<()> {
    if let Ok(v) = std::env::var("JOBBUS_FRONTEND_ADDR") {
        cfg.frontend_addr = v;
    }
    if let Ok(v) = std::env::var("JOBBUS_BACKEND_ADDR") {
        cfg.backend_addr = v;
    }
    if let Ok(v) = std::env::var("JOBBUS_HEARTBEAT_INTERVAL") {
        cfg.heartbeat_interval = Duration::from_secs(v.parse().context("JOBBUS_HEARTBEAT_INTERVAL")?);
    }
    if let Ok(v) = std::env::var("JOBBUS_HEARTBEAT_TIMEOUT") {
        cfg.heartbeat_timeout = Duration::from_secs(v.parse().context("JOBBUS_HEARTBEAT_TIMEOUT")?);
    }
    if let Ok(v) = std::env::var("JOBBUS_DISABLE_HEARTBEATS") {
        cfg.disable_heartbeats = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Ok(v) = std::env::var("JOBBUS_HWM") {
        cfg.hwm = v.parse().context("JOBBUS_HWM")?;
    }
    if let Ok(v) = std::env::var("JOBBUS_WORKER_CLEANUP_INTERVAL") {
        cfg.worker_cleanup_interval =
            Duration::from_secs(v.parse().context("JOBBUS_WORKER_CLEANUP_INTERVAL")?);
    }
    if let Ok(v) = std::env::var("JOBBUS_SCHEDULER_CLEANUP_INTERVAL") {
        cfg.scheduler_cleanup_interval =
            Duration::from_secs(v.parse().context("JOBBUS_SCHEDULER_CLEANUP_INTERVAL")?);
    }
    if let Ok(v) = std::env::var("JOBBUS_LOG_FILTER") {
        cfg.log_filter = Some(v);
    }
    Ok(())
}

fn apply_cli(cfg: &mut Config, cli: &CliOverrides) {
    if let Some(v) = &cli.frontend_addr {
        cfg.frontend_addr = v.clone();
    }
    if let Some(v) = &cli.backend_addr {
        cfg.backend_addr = v.clone();
    }
    if let Some(v) = cli.heartbeat_interval {
        cfg.heartbeat_interval = Duration::from_secs(v);
    }
    if let Some(v) = cli.heartbeat_timeout {
        cfg.heartbeat_timeout = Duration::from_secs(v);
    }
    if let Some(v) = cli.disable_heartbeats {
        cfg.disable_heartbeats = v;
    }
    if let Some(v) = cli.hwm {
        cfg.hwm = v;
    }
    if let Some(v) = cli.worker_cleanup_interval {
        cfg.worker_cleanup_interval = Duration::from_secs(v);
    }
    if let Some(v) = cli.scheduler_cleanup_interval {
        cfg.scheduler_cleanup_interval = Duration::from_secs(v);
    }
    if let Some(v) = &cli.log_filter {
        cfg.log_filter = Some(v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_nothing_given() {
        let cfg = Config::load(None, &CliOverrides::default()).unwrap();
        assert_eq!(cfg.frontend_addr, DEFAULT_FRONTEND_ADDR);
        assert_eq!(cfg.hwm, DEFAULT_HWM);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "hwm = 42\nfrontend_addr = \"tcp://127.0.0.1:9000\"").unwrap();
        let cfg = Config::load(Some(tmp.path()), &CliOverrides::default()).unwrap();
        assert_eq!(cfg.hwm, 42);
        assert_eq!(cfg.frontend_addr, "tcp://127.0.0.1:9000");
        assert_eq!(cfg.backend_addr, DEFAULT_BACKEND_ADDR);
    }

    #[test]
    fn cli_overrides_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "hwm = 42").unwrap();
        let cli = CliOverrides {
            hwm: Some(7),
            ..Default::default()
        };
        let cfg = Config::load(Some(tmp.path()), &cli).unwrap();
        assert_eq!(cfg.hwm, 7);
    }
}
