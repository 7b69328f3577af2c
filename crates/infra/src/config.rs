//! Validation subsystem configuration, read from `SHOPGEO_*` environment
//! variables.

use std::str::FromStr;
use std::time::Duration;

use crate::geodata::DEFAULT_OVERPASS_URL;
use crate::workers::WorkerConfig;

/// Default cap on shops per validation batch.
pub const SINGLE_VALIDATION_SHOPS_COUNT_MAX: usize = 20;

pub const ENV_OVERPASS_URL: &str = "SHOPGEO_OVERPASS_URL";
pub const ENV_BATCH_MAX: &str = "SHOPGEO_VALIDATION_BATCH_MAX";
pub const ENV_BACKOFF_SECS: &str = "SHOPGEO_VALIDATION_BACKOFF_SECS";
pub const ENV_REVALIDATION_MAX_AGE_DAYS: &str = "SHOPGEO_REVALIDATION_MAX_AGE_DAYS";
pub const ENV_TESTING: &str = "SHOPGEO_TESTING";
pub const ENV_ENSURE_SCHEMA: &str = "SHOPGEO_ENSURE_SCHEMA";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Most shops sent to the geodata service in one batch.
    pub batch_max: usize,
    pub worker: WorkerConfig,
    /// Shops last validated longer ago than this get a periodic
    /// revalidation task at startup. `None` disables it.
    pub revalidation_max_age: Option<chrono::Duration>,
    pub overpass_url: String,
    /// Allows swapping the geodata resolver at runtime.
    pub testing: bool,
    /// Create the tables at startup (dev databases).
    pub ensure_schema: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            batch_max: SINGLE_VALIDATION_SHOPS_COUNT_MAX,
            worker: WorkerConfig::default(),
            revalidation_max_age: None,
            overpass_url: DEFAULT_OVERPASS_URL.to_string(),
            testing: false,
            ensure_schema: false,
        }
    }
}

impl ValidationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_OVERPASS_URL) {
            config.overpass_url = url.trim().to_string();
        }
        if let Some(raw) = get(ENV_BATCH_MAX) {
            let batch_max: usize = parse_number(ENV_BATCH_MAX, &raw)?;
            if batch_max == 0 {
                return Err(ConfigError::invalid(ENV_BATCH_MAX, &raw, "must be positive"));
            }
            config.batch_max = batch_max;
        }
        if let Some(raw) = get(ENV_BACKOFF_SECS) {
            config.worker.backoff_delays = parse_backoff_secs(&raw)?;
        }
        if let Some(raw) = get(ENV_REVALIDATION_MAX_AGE_DAYS) {
            let days: i64 = parse_number(ENV_REVALIDATION_MAX_AGE_DAYS, &raw)?;
            if days <= 0 {
                return Err(ConfigError::invalid(
                    ENV_REVALIDATION_MAX_AGE_DAYS,
                    &raw,
                    "must be positive",
                ));
            }
            let max_age = chrono::Duration::try_days(days).ok_or_else(|| {
                ConfigError::invalid(ENV_REVALIDATION_MAX_AGE_DAYS, &raw, "too large")
            })?;
            config.revalidation_max_age = Some(max_age);
        }
        if let Some(raw) = get(ENV_TESTING) {
            config.testing = parse_bool(ENV_TESTING, &raw)?;
        }
        if let Some(raw) = get(ENV_ENSURE_SCHEMA) {
            config.ensure_schema = parse_bool(ENV_ENSURE_SCHEMA, &raw)?;
        }
        Ok(config)
    }

    pub fn with_batch_max(mut self, batch_max: usize) -> Self {
        self.batch_max = batch_max;
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_revalidation_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.revalidation_max_age = Some(max_age);
        self
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, raw, e.to_string()))
}

/// `"60,120,240"` -> delays in seconds. Empty entries are rejected.
fn parse_backoff_secs(raw: &str) -> Result<Vec<Duration>, ConfigError> {
    raw.split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(ConfigError::invalid(ENV_BACKOFF_SECS, raw, "empty entry"));
            }
            parse_number::<u64>(ENV_BACKOFF_SECS, part).map(Duration::from_secs)
        })
        .collect()
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, raw, "expected a boolean")),
    }
}
