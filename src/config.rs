use anyhow::{bail, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://reviews.db?mode=rwc";

/// Retry and timeout policy for [`crate::scheduler::Scheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Total tries per response, including the first one.
    pub max_attempts: u32,
    pub store_timeout: Duration,
    /// Base delay between attempts; doubled each retry, with jitter.
    pub retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            store_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Reads `SRS_*` variables, after loading a `.env` file if one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = SchedulerConfig::default();

        let database_url = lookup("SRS_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let max_attempts = parse_or(&lookup, "SRS_MAX_ATTEMPTS", defaults.max_attempts)?;
        let timeout_ms = parse_or(&lookup, "SRS_STORE_TIMEOUT_MS", defaults.store_timeout.as_millis() as u64)?;
        let backoff_ms = parse_or(&lookup, "SRS_RETRY_BACKOFF_MS", defaults.retry_backoff.as_millis() as u64)?;

        if max_attempts == 0 {
            bail!("SRS_MAX_ATTEMPTS must be at least 1");
        }
        if timeout_ms == 0 {
            bail!("SRS_STORE_TIMEOUT_MS must be at least 1");
        }

        Ok(Self {
            database_url,
            scheduler: SchedulerConfig {
                max_attempts,
                store_timeout: Duration::from_millis(timeout_ms),
                retry_backoff: Duration::from_millis(backoff_ms),
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        None => Ok(default),
    }
}
