use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::limits::{DEFAULT_TEMPLATE_CACHE_SIZE, MAX_PREGENERATE_DAYS, MAX_SWEEP_LIMIT};

/// Daemon settings, read from `SLOTKEEP_*` environment variables.
/// Unset or unparseable values fall back to defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub log_json: bool,
    pub template_cache_size: usize,

    /// How often the background sweep reclaims lapsed reservations.
    pub sweep_interval: Duration,
    /// Rows one sweep run may rewrite; keeps each run short.
    pub sweep_limit: usize,

    /// WAL appends after which the compactor rewrites the log.
    pub compact_threshold: u64,

    /// JSON business directory for pre-generation. None disables pre-generation.
    pub businesses_file: Option<PathBuf>,
    /// Days ahead (including today) to materialize.
    pub pregenerate_days: u32,
    pub pregenerate_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            log_json: false,
            template_cache_size: DEFAULT_TEMPLATE_CACHE_SIZE,
            sweep_interval: Duration::from_secs(5),
            sweep_limit: 500,
            compact_threshold: 1000,
            businesses_file: None,
            pregenerate_days: 14,
            pregenerate_interval: Duration::from_secs(3600),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("SLOTKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_port: env_parse("SLOTKEEP_METRICS_PORT"),
            log_json: std::env::var("SLOTKEEP_LOG_JSON")
                .is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes")),
            template_cache_size: env_parse("SLOTKEEP_TEMPLATE_CACHE_SIZE")
                .unwrap_or(defaults.template_cache_size),
            sweep_interval: env_parse("SLOTKEEP_SWEEP_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            sweep_limit: env_parse::<usize>("SLOTKEEP_SWEEP_LIMIT")
                .map(|n| n.min(MAX_SWEEP_LIMIT))
                .unwrap_or(defaults.sweep_limit),
            compact_threshold: env_parse("SLOTKEEP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            businesses_file: std::env::var("SLOTKEEP_BUSINESSES").ok().map(PathBuf::from),
            pregenerate_days: env_parse::<u32>("SLOTKEEP_PREGENERATE_DAYS")
                .map(|d| d.min(MAX_PREGENERATE_DAYS))
                .unwrap_or(defaults.pregenerate_days),
            pregenerate_interval: env_parse("SLOTKEEP_PREGENERATE_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.pregenerate_interval),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slots.wal")
    }
}
