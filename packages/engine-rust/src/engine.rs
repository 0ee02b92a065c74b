//! Engine facade: one shared instance of each component.
//!
//! Object stores are created lazily, one per entity type, and looked up by
//! `TypeId` so that every caller asking for `store::<Order>()` shares the
//! same records and index.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tidepool_core::Entity;
use tracing::{debug, info};

use crate::cache::{CacheManager, ExpirySweeper};
use crate::config::EngineConfig;
use crate::geo::GeoIndex;
use crate::pubsub::Broker;
use crate::storage::ObjectStore;
use crate::worker::BackgroundWorker;

/// In-process data engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    /// `TypeId` of the entity -> `Arc<ObjectStore<T>>`.
    stores: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    geo: Arc<GeoIndex>,
    broker: Arc<Broker>,
    caches: Arc<CacheManager>,
    sweeper: Mutex<Option<BackgroundWorker<ExpirySweeper>>>,
}

impl Engine {
    /// Builds an engine from `config`.
    ///
    /// No background tasks are started; see [`start_background`](Self::start_background).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        config.validate()?;
        info!(
            id_generation_attempts = config.store.id_generation_attempts,
            listener_queue_capacity = ?config.pubsub.listener_queue_capacity,
            default_cache_ttl_ms = config.cache.default_ttl_ms,
            "engine created"
        );
        Ok(Self {
            geo: Arc::new(GeoIndex::new()),
            broker: Arc::new(Broker::new(config.pubsub.clone())),
            caches: Arc::new(CacheManager::new(config.cache.clone())),
            stores: DashMap::new(),
            sweeper: Mutex::new(None),
            config: Arc::new(config),
        })
    }

    /// The object store for entity type `T`, created on first use.
    pub fn store<T: Entity>(&self) -> Arc<ObjectStore<T>> {
        let erased = Arc::clone(
            &self
                .stores
                .entry(TypeId::of::<T>())
                .or_insert_with(|| {
                    debug!(kind = T::KIND, "object store created");
                    Arc::new(ObjectStore::<T>::new(self.config.store.clone()))
                        as Arc<dyn Any + Send + Sync>
                }),
        );
        match erased.downcast::<ObjectStore<T>>() {
            Ok(store) => store,
            Err(_) => unreachable!("store registry is keyed by the entity's TypeId"),
        }
    }

    pub fn geo(&self) -> &Arc<GeoIndex> {
        &self.geo
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn caches(&self) -> &Arc<CacheManager> {
        &self.caches
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts the cache expiry sweeper if one is configured and not yet
    /// running. Returns whether a sweeper is running afterwards.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime while a sweep interval is
    /// configured.
    pub fn start_background(&self) -> bool {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = self.caches.start_sweeper();
        }
        sweeper.is_some()
    }

    /// Stops background work and drops every pub/sub subscription.
    ///
    /// Stored records, geo sets and cached values stay readable.
    pub async fn shutdown(&self) {
        let worker = self.sweeper.lock().take();
        if let Some(mut worker) = worker {
            worker.stop().await;
        }
        let dropped = self.broker.shutdown();
        info!(dropped_subscriptions = dropped, "engine shut down");
    }
}
