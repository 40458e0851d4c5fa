//! Batch keyed cache-aside resolver
//!
//! Resolves a set of ids to values: one multi-get per chunk of keys, one
//! loader call for every id the cache did not have, one multi-set backfill.
//! Each id is cached under its own key, so overlapping batches share entries.

use crate::cache::{
    config::CacheConfig,
    key::CacheKeySpec,
    loader::BatchLoader,
    store::KeyedCacheStore,
    types::{CacheKey, CacheValue},
};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-through resolver mapping ids to values
pub struct BatchKeyedCacheAside<Id, V> {
    store: Arc<dyn KeyedCacheStore>,
    spec: CacheKeySpec,
    loader: Box<dyn BatchLoader<Id, V>>,
    max_batch_size: usize,
}

impl<Id, V> BatchKeyedCacheAside<Id, V>
where
    Id: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wrap `loader` so each of its values is cached under `spec`
    pub fn wrap<L>(
        store: Arc<dyn KeyedCacheStore>,
        spec: CacheKeySpec,
        config: &CacheConfig,
        loader: L,
    ) -> Self
    where
        L: BatchLoader<Id, V> + 'static,
    {
        Self {
            store,
            spec,
            loader: Box::new(loader),
            max_batch_size: config.max_batch_size.max(1),
        }
    }

    /// The spec this resolver caches under
    pub fn spec(&self) -> &CacheKeySpec {
        &self.spec
    }

    /// Resolve `ids`, reading through the cache
    pub async fn resolve_ids<I>(&self, ids: I) -> Result<HashMap<Id, V>>
    where
        I: IntoIterator<Item = Id>,
    {
        self.resolve(ids, &[], false).await
    }

    /// Resolve `ids` to values.
    ///
    /// Duplicate ids collapse. Ids found in the cache skip the loader unless
    /// `force` is set; the loader sees only the remaining ids, and whatever it
    /// returns is written back before being merged into the result. Ids the
    /// loader leaves out are absent from the result. An empty input returns
    /// an empty map without touching the cache or the loader.
    pub async fn resolve<I>(&self, ids: I, extra: &[String], force: bool) -> Result<HashMap<Id, V>>
    where
        I: IntoIterator<Item = Id>,
    {
        let ids: HashSet<Id> = ids.into_iter().collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut resolved: HashMap<Id, V> = HashMap::with_capacity(ids.len());
        if !force {
            self.read_cached(&ids, extra, &mut resolved).await;
        }

        let remaining: HashSet<Id> = ids
            .into_iter()
            .filter(|id| !resolved.contains_key(id))
            .collect();
        if remaining.is_empty() {
            debug!("All {} ids served from {}", resolved.len(), self.spec.key_prefix);
            return Ok(resolved);
        }

        debug!(
            "Loading {} ids for {} ({} cached)",
            remaining.len(),
            self.spec.key_prefix,
            resolved.len()
        );
        let loaded = self.loader.load(remaining, extra.to_vec()).await?;

        if !loaded.is_empty() {
            self.backfill(&loaded, extra).await;
        }

        resolved.extend(loaded);
        Ok(resolved)
    }

    async fn read_cached(&self, ids: &HashSet<Id>, extra: &[String], resolved: &mut HashMap<Id, V>) {
        let by_key: HashMap<CacheKey, &Id> = ids
            .iter()
            .map(|id| (self.spec.key_for(id, extra), id))
            .collect();
        let keys: Vec<CacheKey> = by_key.keys().cloned().collect();

        for chunk in keys.chunks(self.max_batch_size) {
            let hits = match self.store.get_many(chunk).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(
                        "Cache multi-get failed for {}, loading from store: {}",
                        self.spec.key_prefix, e
                    );
                    return;
                }
            };

            for (key, raw) in hits {
                let Some(id) = by_key.get(&key) else {
                    continue;
                };
                match serde_json::from_value::<V>(raw) {
                    Ok(value) => {
                        resolved.insert((*id).clone(), value);
                    }
                    Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
                }
            }
        }
    }

    async fn backfill(&self, loaded: &HashMap<Id, V>, extra: &[String]) {
        let mut values: Vec<(CacheKey, CacheValue)> = Vec::with_capacity(loaded.len());
        for (id, value) in loaded {
            match serde_json::to_value(value) {
                Ok(raw) => values.push((self.spec.key_for(id, extra), raw)),
                Err(e) => warn!("Skipping backfill of {} {}: {}", self.spec.key_prefix, id, e),
            }
        }

        for chunk in values.chunks(self.max_batch_size) {
            let batch: HashMap<CacheKey, CacheValue> = chunk.iter().cloned().collect();
            if let Err(e) = self.store.set_many(batch, self.spec.ttl).await {
                warn!(
                    "Cache backfill failed for {} keys of {}: {}",
                    chunk.len(),
                    self.spec.key_prefix,
                    e
                );
            }
        }
    }
}
