//! Configuration for the cache system

use crate::cache::key::DEFAULT_EXPIRY;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the cache store, the resolvers and the
/// invalidation dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live of the lending projections
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0)
    /// Spreads expiry of entries written in the same burst
    pub ttl_jitter: f64,

    /// Maximum number of keys per multi-get / multi-set call
    pub max_batch_size: usize,

    /// Maximum number of keys per multi-delete call
    pub invalidation_chunk_size: usize,

    /// Enable the background sweep of expired entries
    pub enable_auto_cleanup: bool,

    /// Interval between background sweeps
    pub cleanup_interval: Duration,

    /// Enable hit/miss accounting
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_EXPIRY,
            ttl_jitter: 0.0,
            max_batch_size: 300,
            invalidation_chunk_size: 500,
            enable_auto_cleanup: true,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.default_ttl.is_zero() {
            return Err("default_ttl must be greater than 0".to_string());
        }

        if self.max_batch_size == 0 {
            return Err("max_batch_size must be greater than 0".to_string());
        }

        if self.invalidation_chunk_size == 0 {
            return Err("invalidation_chunk_size must be greater than 0".to_string());
        }

        if self.ttl_jitter < 0.0 || self.ttl_jitter > 1.0 {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }

    /// Apply the configured jitter to a key spec's TTL
    pub fn jittered(&self, ttl: Duration) -> Duration {
        if self.ttl_jitter == 0.0 {
            return ttl;
        }

        let base_secs = ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    max_batch_size: Option<usize>,
    invalidation_chunk_size: Option<usize>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    enable_metrics: Option<bool>,
}

impl CacheConfigBuilder {
    /// Set default TTL
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set the multi-get / multi-set chunk size
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Set the multi-delete chunk size
    pub fn invalidation_chunk_size(mut self, size: usize) -> Self {
        self.invalidation_chunk_size = Some(size);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Enable or disable metrics collection
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = Some(enable);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            max_batch_size: self.max_batch_size.unwrap_or(defaults.max_batch_size),
            invalidation_chunk_size: self
                .invalidation_chunk_size
                .unwrap_or(defaults.invalidation_chunk_size),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_metrics: self.enable_metrics.unwrap_or(defaults.enable_metrics),
        }
    }
}
