//! # Cache-Aside Read Layer
//!
//! Read-through caching for the lending projections, in front of the record
//! store.
//!
//! ## Features
//!
//! - **Key Specs**: Named key templates with a prefix, a key function and a TTL
//! - **Batch Resolution**: Deduplicated, chunked multi-get with a single loader call for misses
//! - **Falsy Guard**: Empty or null loader results are never written to the cache
//! - **Degraded Mode**: An unreachable cache backend reads as a miss, never as an error
//! - **Invalidation**: Write paths delete derived keys in chunks after they commit
//!
//! ## Example
//!
//! ```rust
//! use clubshelf::cache::{
//!     batch_loader, BatchKeyedCacheAside, CacheConfig, InMemoryCacheStore, BOOK_INFOS,
//! };
//! use std::collections::{HashMap, HashSet};
//! use std::sync::Arc;
//!
//! # async fn example() -> clubshelf::Result<()> {
//! let config = CacheConfig::default();
//! let store = Arc::new(InMemoryCacheStore::new(config.clone()));
//!
//! let titles = BatchKeyedCacheAside::wrap(
//!     store,
//!     BOOK_INFOS,
//!     &config,
//!     batch_loader(|ids: HashSet<i64>, _extra: Vec<String>| async move {
//!         Ok(ids
//!             .into_iter()
//!             .map(|id| (id, format!("book {}", id)))
//!             .collect::<HashMap<_, _>>())
//!     }),
//! );
//!
//! let found = titles.resolve_ids([1, 2, 2]).await?;
//! assert_eq!(found.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod entry;
pub mod invalidation;
pub mod key;
pub mod loader;
pub mod single;
pub mod store;
pub mod types;

pub use batch::BatchKeyedCacheAside;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::CacheEntry;
pub use invalidation::{InvalidationDispatcher, InvalidationReport};
pub use key::*;
pub use loader::{batch_loader, single_loader, BatchFn, BatchLoader, SingleFn, SingleLoader};
pub use single::SingleValueCacheAside;
pub use store::{start_auto_cleanup, InMemoryCacheStore, KeyedCacheStore};
pub use types::{is_falsy, CacheKey, CacheStats, CacheValue};
