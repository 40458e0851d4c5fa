//! Keyed cache store abstraction and the in-memory TTL implementation

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    types::{CacheKey, CacheStats, CacheValue},
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Shared key/value store the resolvers read through.
///
/// Absence is never an error and entries may disappear at any time.
/// Implementations report an unreachable backend as
/// [`ClubshelfError::CacheBackendUnavailable`](crate::error::ClubshelfError);
/// callers treat that as a miss.
#[async_trait]
pub trait KeyedCacheStore: Send + Sync {
    /// Get a single value
    async fn get(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Get many values; the result holds present keys only
    async fn get_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheValue>>;

    /// Store a value for `ttl`
    async fn set(&self, key: CacheKey, value: CacheValue, ttl: Duration) -> Result<()>;

    /// Store many values sharing one `ttl`
    async fn set_many(&self, values: HashMap<CacheKey, CacheValue>, ttl: Duration) -> Result<()>;

    /// Delete a key; deleting an absent key is a no-op
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete many keys
    async fn delete_many(&self, keys: &[CacheKey]) -> Result<()>;
}

/// In-memory cache store with TTL-only expiry.
///
/// There is no eviction policy: entries leave the map when they expire
/// (lazily on read, or through [`cleanup_expired`](Self::cleanup_expired))
/// or when deleted.
pub struct InMemoryCacheStore {
    config: CacheConfig,
    store: Arc<RwLock<MemoryStore>>,
}

struct MemoryStore {
    entries: HashMap<CacheKey, CacheEntry>,
    stats: CacheStats,
}

impl InMemoryCacheStore {
    /// Create a new store with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing in-memory cache store with config: {:?}", config);

        Self {
            config,
            store: Arc::new(RwLock::new(MemoryStore {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            })),
        }
    }

    /// Store configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        let mut stats = store.stats.clone();
        stats.entries = store.entries.len();
        stats
    }

    /// Number of entries held, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Check if a live entry exists (without counting a hit)
    pub async fn contains_key(&self, key: &str) -> bool {
        let store = self.store.read().await;
        store
            .entries
            .get(key)
            .map(|entry| !entry.is_expired())
            .unwrap_or(false)
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut store = self.store.write().await;
        let count = store.entries.len();
        store.entries.clear();
        store.stats.invalidations += count as u64;
        info!("Cleared {} entries from cache", count);
    }

    /// Remove all expired entries, returning their keys
    pub async fn cleanup_expired(&self) -> Vec<CacheKey> {
        let mut store = self.store.write().await;
        let now = Utc::now();

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            store.entries.remove(key);
        }
        store.stats.expirations += expired_keys.len() as u64;
        expired_keys
    }

    fn lookup(&self, store: &mut MemoryStore, key: &str) -> Option<CacheValue> {
        let live = store
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired()).then(|| entry.value.clone()));

        match live {
            Some(Some(value)) => {
                if self.config.enable_metrics {
                    store.stats.hits += 1;
                }
                Some(value)
            }
            Some(None) => {
                debug!("Cache entry expired: {}", key);
                store.entries.remove(key);
                store.stats.expirations += 1;
                if self.config.enable_metrics {
                    store.stats.misses += 1;
                }
                None
            }
            None => {
                if self.config.enable_metrics {
                    store.stats.misses += 1;
                }
                None
            }
        }
    }
}

#[async_trait]
impl KeyedCacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let mut store = self.store.write().await;
        Ok(self.lookup(&mut store, key))
    }

    async fn get_many(&self, keys: &[CacheKey]) -> Result<HashMap<CacheKey, CacheValue>> {
        let mut store = self.store.write().await;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.lookup(&mut store, key) {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    async fn set(&self, key: CacheKey, value: CacheValue, ttl: Duration) -> Result<()> {
        let ttl = self.config.jittered(ttl);
        let mut store = self.store.write().await;
        store
            .entries
            .insert(key.clone(), CacheEntry::new(key, value, ttl));
        store.stats.writes += 1;
        Ok(())
    }

    async fn set_many(&self, values: HashMap<CacheKey, CacheValue>, ttl: Duration) -> Result<()> {
        let ttl = self.config.jittered(ttl);
        let mut store = self.store.write().await;
        let count = values.len();
        for (key, value) in values {
            store
                .entries
                .insert(key.clone(), CacheEntry::new(key, value, ttl));
        }
        store.stats.writes += count as u64;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut store = self.store.write().await;
        if store.entries.remove(key).is_some() {
            store.stats.invalidations += 1;
            debug!("Removed cache entry: {}", key);
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[CacheKey]) -> Result<()> {
        let mut store = self.store.write().await;
        let mut removed = 0u64;
        for key in keys {
            if store.entries.remove(key).is_some() {
                removed += 1;
            }
        }
        store.stats.invalidations += removed;
        Ok(())
    }
}

/// Background task for automatic cache cleanup
pub async fn start_auto_cleanup(cache: Arc<InMemoryCacheStore>) {
    if !cache.config.enable_auto_cleanup {
        info!("Automatic cache cleanup disabled");
        return;
    }

    let interval = cache.config.cleanup_interval;
    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let expired = cache.cleanup_expired().await;
        if !expired.is_empty() {
            debug!("Auto cleanup removed {} expired entries", expired.len());
        }
    }
}
