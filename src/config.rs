use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::engine::EngineSettings;

const MAX_OFFSET_MINUTES: i32 = 18 * 60;

/// Process configuration, read from `TABLEWISE_*` environment variables.
/// Missing or unparseable values fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub lock_timeout: Duration,
    pub utc_offset_minutes: i32,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            lock_timeout: Duration::from_millis(2000),
            utc_offset_minutes: 0,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let utc_offset_minutes = parse_var(&lookup, "TABLEWISE_UTC_OFFSET_MINUTES")
            .filter(|m: &i32| m.abs() <= MAX_OFFSET_MINUTES)
            .unwrap_or(defaults.utc_offset_minutes);

        Self {
            data_dir: lookup("TABLEWISE_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parse_var(&lookup, "TABLEWISE_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            compact_interval: parse_var(&lookup, "TABLEWISE_COMPACT_INTERVAL_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.compact_interval),
            lock_timeout: parse_var(&lookup, "TABLEWISE_LOCK_TIMEOUT_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            utc_offset_minutes,
            metrics_port: parse_var(&lookup, "TABLEWISE_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tablewise.wal")
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            wal_path: self.wal_path(),
            lock_timeout: self.lock_timeout,
            utc_offset: self.utc_offset(),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}
