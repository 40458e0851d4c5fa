//! Process configuration
//!
//! Values come from the environment, after loading a `.env` file when one
//! exists. Unset variables fall back to the [`CacheConfig`] defaults.

use crate::cache::CacheConfig;
use crate::error::{ClubshelfError, Result};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_CACHE_TTL_SECS: &str = "CLUBSHELF_CACHE_TTL_SECS";
pub const ENV_CACHE_MAX_BATCH: &str = "CLUBSHELF_CACHE_MAX_BATCH";
pub const ENV_INVALIDATION_CHUNK: &str = "CLUBSHELF_INVALIDATION_CHUNK";
pub const ENV_ACCRUAL_INTERVAL_SECS: &str = "CLUBSHELF_ACCRUAL_INTERVAL_SECS";
pub const ENV_LOG: &str = "CLUBSHELF_LOG";

/// One accrual run a day
pub const DEFAULT_ACCRUAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub const DEFAULT_LOG_FILTER: &str = "clubshelf=info";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub accrual_interval: Duration,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            accrual_interval: DEFAULT_ACCRUAL_INTERVAL,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut builder = CacheConfig::builder();

        if let Some(secs) = parse_var::<u64>(&lookup, ENV_CACHE_TTL_SECS)? {
            builder = builder.default_ttl(Duration::from_secs(secs));
        }
        if let Some(size) = parse_var::<usize>(&lookup, ENV_CACHE_MAX_BATCH)? {
            builder = builder.max_batch_size(size);
        }
        if let Some(size) = parse_var::<usize>(&lookup, ENV_INVALIDATION_CHUNK)? {
            builder = builder.invalidation_chunk_size(size);
        }

        let accrual_interval = match parse_var::<u64>(&lookup, ENV_ACCRUAL_INTERVAL_SECS)? {
            Some(0) => {
                return Err(ClubshelfError::Config(format!(
                    "{} must be greater than 0",
                    ENV_ACCRUAL_INTERVAL_SECS
                )))
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.accrual_interval,
        };

        let config = Self {
            cache: builder.build(),
            accrual_interval,
            log_filter: lookup(ENV_LOG)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.log_filter),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cache.validate().map_err(ClubshelfError::Config)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ClubshelfError::Config(format!("{} has an invalid value: {:?}", name, raw))),
    }
}
