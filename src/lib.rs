//! # clubshelf
//!
//! Lending lifecycle for book clubs: members pledge their copies to a club,
//! the club lends them to other members and tracks overdue returns, and a
//! free shelf lends club-owned stock to walk-in borrowers.
//!
//! ## Layout
//!
//! - [`cache`]: cache-aside resolvers (single value and batch keyed) over an
//!   injected [`cache::KeyedCacheStore`], plus chunked invalidation
//! - [`records`]: record types and the transactional [`records::RecordStore`]
//! - [`lending`]: the state machine, cached projections, the
//!   [`lending::LendingService`] and the overdue accrual job
//! - [`config`]: environment-driven process configuration
//!
//! ## Example
//!
//! ```rust
//! use clubshelf::cache::{CacheConfig, InMemoryCacheStore};
//! use clubshelf::lending::LendingService;
//! use clubshelf::records::{demo, InMemoryRecordStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> clubshelf::Result<()> {
//! let config = CacheConfig::default();
//! let records = Arc::new(InMemoryRecordStore::seeded(demo::demo_club()).await);
//! let cache = Arc::new(InMemoryCacheStore::new(config.clone()));
//! let service = LendingService::new(records, cache, &config);
//!
//! let books = service.resolve_book_infos(&[demo::EARTHSEA]).await?;
//! assert_eq!(books[&demo::EARTHSEA].name, "A Wizard of Earthsea");
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod lending;
pub mod records;

pub use config::AppConfig;
pub use error::{ClubshelfError, Result};
pub use lending::{LendingService, OverdueAccrualJob};
