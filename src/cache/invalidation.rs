//! Cache invalidation
//!
//! Write paths never update cached projections in place; they delete the keys
//! whose derived values they changed and let the next read backfill them.
//! [`InvalidationDispatcher`] does the deleting: one key, a deduplicated set of
//! keys in store-sized chunks, or every key of a list of specs for a set of ids.

use crate::cache::{key::CacheKeySpec, store::KeyedCacheStore, types::CacheKey};
use crate::error::ClubshelfError;
use std::collections::HashSet;
use std::fmt;
use std::ops::AddAssign;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Distinct keys requested
    pub requested: usize,

    /// Keys whose delete call succeeded
    pub deleted: usize,

    /// Keys whose chunk failed; they stay stale until TTL
    pub failed: usize,
}

impl InvalidationReport {
    /// True when every chunk was deleted
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// The non-fatal error describing a partial failure, if any
    pub fn partial_failure(&self) -> Option<ClubshelfError> {
        (self.failed > 0).then(|| ClubshelfError::InvalidationPartialFailure {
            failed: self.failed,
            total: self.requested,
        })
    }
}

impl AddAssign for InvalidationReport {
    fn add_assign(&mut self, other: Self) {
        self.requested += other.requested;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

/// Deletes cache keys on behalf of write paths.
///
/// Failures are logged and reported, never returned as errors: the mutation
/// that triggered the invalidation has already committed.
#[derive(Clone)]
pub struct InvalidationDispatcher {
    store: Arc<dyn KeyedCacheStore>,
    chunk_size: usize,
}

impl InvalidationDispatcher {
    /// Create a dispatcher deleting at most `chunk_size` keys per call
    pub fn new(store: Arc<dyn KeyedCacheStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Delete one key
    pub async fn invalidate_one(&self, key: &str) -> InvalidationReport {
        match self.store.delete(key).await {
            Ok(()) => {
                debug!("Invalidated cache key: {}", key);
                InvalidationReport {
                    requested: 1,
                    deleted: 1,
                    failed: 0,
                }
            }
            Err(e) => {
                warn!("Failed to invalidate cache key {}: {}", key, e);
                InvalidationReport {
                    requested: 1,
                    deleted: 0,
                    failed: 1,
                }
            }
        }
    }

    /// Deduplicate `keys` and delete them in chunks
    pub async fn invalidate_many<I>(&self, keys: I) -> InvalidationReport
    where
        I: IntoIterator<Item = CacheKey>,
    {
        let mut seen = HashSet::new();
        let keys: Vec<CacheKey> = keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .collect();

        let mut report = InvalidationReport {
            requested: keys.len(),
            ..Default::default()
        };

        for chunk in keys.chunks(self.chunk_size) {
            match self.store.delete_many(chunk).await {
                Ok(()) => report.deleted += chunk.len(),
                Err(e) => {
                    warn!(
                        "Failed to invalidate {} cache keys (first: {}): {}",
                        chunk.len(),
                        chunk[0],
                        e
                    );
                    report.failed += chunk.len();
                }
            }
        }

        if let Some(err) = report.partial_failure() {
            warn!("{}", err);
        } else if report.requested > 0 {
            debug!("Invalidated {} cache keys", report.requested);
        }
        report
    }

    /// Delete every key of `specs` × `ids` in one chunked call
    pub async fn invalidate_for_ids<I, D>(&self, specs: &[CacheKeySpec], ids: I) -> InvalidationReport
    where
        I: IntoIterator<Item = D>,
        D: fmt::Display,
    {
        let keys = {
            let ids: Vec<D> = ids.into_iter().collect();
            specs
                .iter()
                .flat_map(|spec| ids.iter().map(move |id| spec.key_for(id, &[])))
                .collect::<Vec<_>>()
        };
        self.invalidate_many(keys).await
    }
}
