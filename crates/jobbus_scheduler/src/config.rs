//! Immutable configuration snapshot for the scheduler binary, layered file
//! < env < CLI exactly as the router's config is — see
//! `jobbus_router::config` for the pattern this mirrors.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::job::CronJobConfig;

const DEFAULT_BROKER_ADDR: &str = "tcp://127.0.0.1:7830";
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 15;
const DEFAULT_TICK_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub broker_addr: String,
    pub heartbeat_interval: Duration,
    /// How often the event loop wakes even with nothing pending, so cron
    /// and interval jobs are evaluated at sub-heartbeat granularity.
    pub tick_interval: Duration,
    pub log_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_addr: DEFAULT_BROKER_ADDR.to_string(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            log_filter: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    broker_addr: Option<String>,
    heartbeat_interval: Option<u64>,
    tick_interval: Option<u64>,
    log_filter: Option<String>,
    #[serde(default)]
    cron_jobs: Vec<CronJobConfig>,
}

#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub broker_addr: Option<String>,
    pub heartbeat_interval: Option<u64>,
    pub tick_interval: Option<u64>,
    pub log_filter: Option<String>,
}

impl Config {
    /// Load the config snapshot and the (possibly empty) preloaded cron
    /// table in one pass, since both come from the same optional file.
    pub fn load(file_path: Option<&Path>, cli: &CliOverrides) -> Result<(Config, Vec<CronJobConfig>)> {
        let mut cfg = Config::default();
        let mut cron_jobs = Vec::new();

        if let Some(path) = file_path {
            if path.exists() {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                let file: FileConfig = toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?;
                if let Some(v) = file.broker_addr {
                    cfg.broker_addr = v;
                }
                if let Some(v) = file.heartbeat_interval {
                    cfg.heartbeat_interval = Duration::from_secs(v);
                }
                if let Some(v) = file.tick_interval {
                    cfg.tick_interval = Duration::from_secs(v);
                }
                if let Some(v) = file.log_filter {
                    cfg.log_filter = Some(v);
                }
                cron_jobs = file.cron_jobs;
            }
        }

        if let Ok(v) = std::env::var("JOBBUS_BROKER_ADDR") {
            cfg.broker_addr = v;
        }
        if let Ok(v) = std::env::var("JOBBUS_HEARTBEAT_INTERVAL") {
            cfg.heartbeat_interval = Duration::from_secs(v.parse().context("JOBBUS_HEARTBEAT_INTERVAL")?);
        }
        if let Ok(v) = std::env::var("JOBBUS_TICK_INTERVAL") {
            cfg.tick_interval = Duration::from_secs(v.parse().context("JOBBUS_TICK_INTERVAL")?);
        }
        if let Ok(v) = std::env::var("JOBBUS_LOG_FILTER") {
            cfg.log_filter = Some(v);
        }

        if let Some(v) = &cli.broker_addr {
            cfg.broker_addr = v.clone();
        }
        if let Some(v) = cli.heartbeat_interval {
            cfg.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = cli.tick_interval {
            cfg.tick_interval = Duration::from_secs(v);
        }
        if let Some(v) = &cli.log_filter {
            cfg.log_filter = Some(v.clone());
        }

        Ok((cfg, cron_jobs))
    }
}
