//! Typed cache table with lazy expiry and per-key single-flight.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::cached_fn::CachedFn;
use super::error::CacheError;

/// Key bounds for a [`Cache`].
pub trait CacheKey: Eq + Hash + Clone + Send + Sync + 'static {}
impl<T: Eq + Hash + Clone + Send + Sync + 'static> CacheKey for T {}

/// Value bounds for a [`Cache`].
pub trait CacheValue: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> CacheValue for T {}

type Flight<V> = Arc<OnceCell<Result<V, CacheError>>>;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Counters reported by [`Cache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a live entry.
    pub hits: u64,
    /// Reads that had to join or start a computation.
    pub misses: u64,
    /// Times a compute function was actually invoked.
    pub computations: u64,
    /// Computations that returned an error.
    pub failures: u64,
    /// Stored entries, including expired ones not yet evicted.
    pub entries: usize,
}

/// A named read-through cache.
///
/// At most one computation per key is in flight. Callers that miss while a
/// computation is running wait for it and receive a clone of its result.
/// Failures are handed to every waiter but never stored.
pub struct Cache<K, V> {
    name: Arc<str>,
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
    flights: DashMap<K, Flight<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    failures: AtomicU64,
}

impl<K: CacheKey, V: CacheValue> Cache<K, V> {
    /// Creates an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            entries: DashMap::new(),
            flights: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default time-to-live of new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live value for `key`, computing it with `compute` on a
    /// miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ComputeFailure`] if the computation this call
    /// ran or waited on failed.
    pub async fn get_or_compute<F, Fut>(&self, key: K, compute: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.get_or_compute_with_ttl(key, self.ttl, compute).await
    }

    /// [`get_or_compute`](Self::get_or_compute) storing a fresh value with
    /// `ttl` instead of the cache default.
    ///
    /// # Errors
    ///
    /// Same as [`get_or_compute`](Self::get_or_compute).
    pub async fn get_or_compute_with_ttl<F, Fut>(
        &self,
        key: K,
        ttl: Duration,
        compute: F,
    ) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        if let Some(value) = self.live_value(&key) {
            self.record_hit();
            return Ok(value);
        }
        self.record_miss();

        // The map guard is released at the end of this statement.
        let flight: Flight<V> = Arc::clone(&self.flights.entry(key.clone()).or_default());

        let result = flight
            .get_or_init(|| async {
                // A flight that finished just before we joined may already
                // have stored the value.
                if let Some(value) = self.live_value(&key) {
                    return Ok(value);
                }
                self.computations.fetch_add(1, Ordering::Relaxed);
                match compute().await {
                    Ok(value) => {
                        self.store(key.clone(), value.clone(), ttl);
                        Ok(value)
                    }
                    Err(err) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        warn!(cache = %self.name, error = %format!("{err:#}"), "cache computation failed");
                        Err(CacheError::ComputeFailure(Arc::new(err)))
                    }
                }
            })
            .await
            .clone();

        self.flights
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));
        result
    }

    /// Live value for `key` without computing. Does not touch the counters.
    pub fn get(&self, key: &K) -> Option<V> {
        self.live_value(key)
    }

    /// Stores `value` with the cache's default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.store(key, value, self.ttl);
    }

    /// Stores `value` with a custom TTL.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.store(key, value, ttl);
    }

    /// Removes the entry for `key`. Returns `true` if one was stored.
    ///
    /// A computation already in flight for `key` still stores its result.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
        debug!(cache = %self.name, "cache cleared");
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!(cache = %self.name, evicted, "expired cache entries evicted");
        }
        evicted
    }

    /// Age of the live entry for `key`, if any.
    pub fn age(&self, key: &K) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| now.saturating_duration_since(entry.inserted_at))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    /// Binds `producer` to this cache: each [`CachedFn::call`] goes through
    /// [`get_or_compute`](Self::get_or_compute).
    pub fn wrap<P, Fut>(self: &Arc<Self>, producer: P) -> CachedFn<K, V, P>
    where
        P: Fn(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        CachedFn::new(Arc::clone(self), producer)
    }

    fn live_value(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        None
    }

    fn store(&self, key: K, value: V, ttl: Duration) {
        let inserted_at = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at,
                expires_at: inserted_at + ttl,
            },
        );
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tidepool_cache_hits_total", "cache" => self.name.to_string()).increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("tidepool_cache_misses_total", "cache" => self.name.to_string()).increment(1);
    }
}

/// Type-erased view used by the manager to sweep caches of any type.
pub(crate) trait ExpirySweep: Send + Sync {
    fn evict_expired(&self) -> usize;
}

impl<K: CacheKey, V: CacheValue> ExpirySweep for Cache<K, V> {
    fn evict_expired(&self) -> usize {
        Cache::evict_expired(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn cache(ttl_secs: u64) -> Arc<Cache<String, u64>> {
        Arc::new(Cache::new("order", Duration::from_secs(ttl_secs)))
    }

    #[tokio::test]
    async fn hit_skips_computation() {
        let cache = cache(600);
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        };

        assert_eq!(cache.get_or_compute("k".into(), compute).await.unwrap(), 42);
        assert_eq!(cache.get_or_compute("k".into(), compute).await.unwrap(), 42);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.computations), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let cache = cache(10);
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let compute = || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as u64) };

        assert_eq!(cache.get_or_compute("k".into(), compute).await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get_or_compute("k".into(), compute).await.unwrap(), 0);
        assert_eq!(cache.age(&"k".into()), Some(Duration::from_secs(9)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"k".into()), None);
        assert_eq!(cache.get_or_compute("k".into(), compute).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn per_call_ttl_overrides_default() {
        let cache = cache(600);
        cache
            .get_or_compute_with_ttl("short".into(), Duration::from_secs(1), || async { Ok(1) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get(&"short".into()), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_share_one_computation() {
        let cache = cache(600);
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute("k".into(), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            Ok(7)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().computations, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_is_shared_but_not_cached() {
        let cache = cache(600);
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_compute("k".into(), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            anyhow::bail!("database unavailable")
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("database unavailable"), "{err}");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().failures, 1);
        assert_eq!(cache.stats().entries, 0);

        let value = cache.get_or_compute("k".into(), || async { Ok(9) }).await;
        assert_eq!(value.unwrap(), 9);
    }

    #[tokio::test]
    async fn waiter_takes_over_after_leader_is_cancelled() {
        let cache = cache(600);

        let leader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("k".into(), || std::future::pending::<anyhow::Result<u64>>())
                    .await
            })
        };
        tokio::task::yield_now().await;

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_compute("k".into(), || async { Ok(5) }).await })
        };
        tokio::task::yield_now().await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert_eq!(waiter.await.unwrap().unwrap(), 5);
        assert_eq!(cache.get(&"k".into()), Some(5));
    }

    #[tokio::test(start_paused = true)]
    async fn peek_insert_invalidate_and_clear() {
        let cache = cache(10);
        assert_eq!(cache.get(&"a".into()), None);

        cache.insert("a".into(), 1);
        cache.insert_with_ttl("b".into(), 2, Duration::from_secs(1));
        assert_eq!(cache.get(&"a".into()), Some(1));
        assert_eq!(cache.len(), 2);

        assert!(cache.invalidate(&"a".into()));
        assert!(!cache.invalidate(&"a".into()));

        cache.insert("c".into(), 3);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn evict_expired_reclaims_only_dead_entries() {
        let cache = cache(10);
        cache.insert_with_ttl("short".into(), 1, Duration::from_secs(1));
        cache.insert("long".into(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().entries, 2);

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.get(&"long".into()), Some(2));
    }
}
