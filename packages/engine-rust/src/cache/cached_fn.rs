use std::future::Future;
use std::sync::Arc;

use super::error::CacheError;
use super::store::{Cache, CacheKey, CacheValue};

/// A producer function whose results are memoised in a [`Cache`].
///
/// Created with [`Cache::wrap`]. Concurrent calls for the same key share
/// one producer invocation.
pub struct CachedFn<K, V, P> {
    cache: Arc<Cache<K, V>>,
    producer: P,
}

impl<K, V, P, Fut> CachedFn<K, V, P>
where
    K: CacheKey,
    V: CacheValue,
    P: Fn(K) -> Fut,
    Fut: Future<Output = anyhow::Result<V>>,
{
    pub(crate) fn new(cache: Arc<Cache<K, V>>, producer: P) -> Self {
        Self { cache, producer }
    }

    /// Returns the cached value for `key`, running the producer on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ComputeFailure`] if the producer failed.
    pub async fn call(&self, key: K) -> Result<V, CacheError> {
        let producer = &self.producer;
        let arg = key.clone();
        self.cache.get_or_compute(key, move || producer(arg)).await
    }

    /// The backing cache.
    pub fn cache(&self) -> &Arc<Cache<K, V>> {
        &self.cache
    }
}
