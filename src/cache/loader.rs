//! Loader traits used by the cache-aside resolvers
//!
//! A loader is the fallback read against the durable record store. Loaders
//! are plain values: implement the trait on a struct, or wrap an async
//! closure with [`single_loader`] / [`batch_loader`].

use crate::error::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;

/// Loads one value from the record store
#[async_trait]
pub trait SingleLoader<V: Send + 'static>: Send + Sync {
    /// Load the value for `args`
    async fn load(&self, args: Vec<String>) -> Result<V>;
}

/// Loads a mapping for a set of ids from the record store.
///
/// Ids missing from the returned map have no value; they are neither cached
/// nor returned to the caller.
#[async_trait]
pub trait BatchLoader<Id: Send + 'static, V: Send + 'static>: Send + Sync {
    /// Load values for `ids`, with the resolver's extra arguments
    async fn load(&self, ids: HashSet<Id>, extra: Vec<String>) -> Result<HashMap<Id, V>>;
}

/// [`SingleLoader`] backed by an async closure
pub struct SingleFn<F>(F);

/// [`BatchLoader`] backed by an async closure
pub struct BatchFn<F>(F);

/// Wrap an async closure as a [`SingleLoader`]
pub fn single_loader<V, F, Fut>(f: F) -> SingleFn<F>
where
    V: Send + 'static,
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    SingleFn(f)
}

/// Wrap an async closure as a [`BatchLoader`]
pub fn batch_loader<Id, V, F, Fut>(f: F) -> BatchFn<F>
where
    Id: Send + 'static,
    V: Send + 'static,
    F: Fn(HashSet<Id>, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<Id, V>>> + Send + 'static,
{
    BatchFn(f)
}

#[async_trait]
impl<V, F, Fut> SingleLoader<V> for SingleFn<F>
where
    V: Send + 'static,
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    async fn load(&self, args: Vec<String>) -> Result<V> {
        (self.0)(args).await
    }
}

#[async_trait]
impl<Id, V, F, Fut> BatchLoader<Id, V> for BatchFn<F>
where
    Id: Send + 'static,
    V: Send + 'static,
    F: Fn(HashSet<Id>, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HashMap<Id, V>>> + Send + 'static,
{
    async fn load(&self, ids: HashSet<Id>, extra: Vec<String>) -> Result<HashMap<Id, V>> {
        (self.0)(ids, extra).await
    }
}
