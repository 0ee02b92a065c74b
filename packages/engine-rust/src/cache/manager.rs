//! Registry of named caches.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use super::error::CacheError;
use super::store::{Cache, CacheKey, CacheValue, ExpirySweep};
use super::sweeper::ExpirySweeper;
use crate::config::CacheConfig;
use crate::worker::BackgroundWorker;

struct RegisteredCache {
    typed: Arc<dyn Any + Send + Sync>,
    sweep: Arc<dyn ExpirySweep>,
}

/// Hands out one shared [`Cache`] per name.
///
/// The first request for a name fixes its key and value types; the TTL comes
/// from [`CacheConfig::ttl_for`].
pub struct CacheManager {
    config: CacheConfig,
    caches: DashMap<String, RegisteredCache>,
}

impl CacheManager {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            caches: DashMap::new(),
        }
    }

    /// Returns the cache registered under `name`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::TypeMismatch`] if `name` was first requested
    /// with different key or value types.
    pub fn cache<K: CacheKey, V: CacheValue>(&self, name: &str) -> Result<Arc<Cache<K, V>>, CacheError> {
        if let Some(existing) = self.caches.get(name) {
            return downcast(name, &existing.typed);
        }
        let registered = self.caches.entry(name.to_string()).or_insert_with(|| {
            let ttl = self.config.ttl_for(name);
            let cache = Arc::new(Cache::<K, V>::new(name, ttl));
            info!(cache = name, ?ttl, "cache created");
            RegisteredCache {
                typed: Arc::clone(&cache) as Arc<dyn Any + Send + Sync>,
                sweep: cache,
            }
        });
        downcast(name, &registered.typed)
    }

    /// Names of every registered cache, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Evicts expired entries from every cache. Returns the total evicted.
    pub fn evict_expired(&self) -> usize {
        // Collect first so no registry guard is held while sweeping.
        let sweeps: Vec<Arc<dyn ExpirySweep>> =
            self.caches.iter().map(|e| Arc::clone(&e.sweep)).collect();
        let evicted: usize = sweeps.iter().map(|cache| cache.evict_expired()).sum();
        debug!(caches = sweeps.len(), evicted, "cache sweep finished");
        evicted
    }

    /// Evicts expired entries from one cache, or `None` if it is unknown.
    pub fn evict_expired_in(&self, name: &str) -> Option<usize> {
        let sweep = Arc::clone(&self.caches.get(name)?.sweep);
        Some(sweep.evict_expired())
    }

    /// Starts the periodic expiry sweeper, or returns `None` when
    /// `sweep_interval_ms` is 0.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start_sweeper(self: &Arc<Self>) -> Option<BackgroundWorker<ExpirySweeper>> {
        if self.config.sweep_interval_ms == 0 {
            return None;
        }
        let interval = Duration::from_millis(self.config.sweep_interval_ms);
        info!(?interval, "starting cache expiry sweeper");
        Some(BackgroundWorker::start(
            ExpirySweeper::new(Arc::clone(self)),
            interval,
        ))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn downcast<K: CacheKey, V: CacheValue>(
    name: &str,
    typed: &Arc<dyn Any + Send + Sync>,
) -> Result<Arc<Cache<K, V>>, CacheError> {
    Arc::clone(typed)
        .downcast::<Cache<K, V>>()
        .map_err(|_| CacheError::TypeMismatch {
            name: name.to_string(),
        })
}
