//! Single-value cache-aside resolver
//!
//! Wraps a [`SingleLoader`] under a [`CacheKeySpec`]. Used for the small
//! dictionaries (authors, categories, clubs...) whose whole content is one
//! cached value.

use crate::cache::{
    key::CacheKeySpec, loader::SingleLoader, store::KeyedCacheStore, types::is_falsy,
};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-through resolver for one value
pub struct SingleValueCacheAside<V> {
    store: Arc<dyn KeyedCacheStore>,
    spec: CacheKeySpec,
    loader: Box<dyn SingleLoader<V>>,
}

impl<V> SingleValueCacheAside<V>
where
    V: Serialize + DeserializeOwned + Send + 'static,
{
    /// Wrap `loader` so its result is cached under `spec`
    pub fn wrap<L>(store: Arc<dyn KeyedCacheStore>, spec: CacheKeySpec, loader: L) -> Self
    where
        L: SingleLoader<V> + 'static,
    {
        Self {
            store,
            spec,
            loader: Box::new(loader),
        }
    }

    /// The spec this resolver caches under
    pub fn spec(&self) -> &CacheKeySpec {
        &self.spec
    }

    /// Resolve the value for `args`.
    ///
    /// A cached value is returned without calling the loader unless `force`
    /// is set. On a miss the loader runs and a truthy result is written back
    /// with the spec's TTL. Cache backend failures degrade to a miss; loader
    /// failures propagate and nothing is written.
    pub async fn resolve(&self, args: &[String], force: bool) -> Result<V> {
        let key = self.spec.key(args);

        if !force {
            match self.store.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_value::<V>(raw) {
                    Ok(value) => {
                        debug!("Cache hit: {}", key);
                        return Ok(value);
                    }
                    Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
                },
                Ok(None) => debug!("Cache miss: {}", key),
                Err(e) => warn!("Cache read failed for {}, loading from store: {}", key, e),
            }
        }

        let value = self.loader.load(args.to_vec()).await?;

        let raw = serde_json::to_value(&value)?;
        if is_falsy(&raw) {
            debug!("Not caching falsy value for {}", key);
        } else if let Err(e) = self.store.set(key.clone(), raw, self.spec.ttl).await {
            warn!("Cache backfill failed for {}: {}", key, e);
        }

        Ok(value)
    }

    /// Resolve with no arguments, reading through the cache
    pub async fn get(&self) -> Result<V> {
        self.resolve(&[], false).await
    }
}
