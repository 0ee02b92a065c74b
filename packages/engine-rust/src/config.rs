//! Engine configuration.
//!
//! Plain structs with `Default` impls. Durations are millisecond `u64`
//! fields so that a JSON config file stays readable; 0 disables optional
//! periodic behavior.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Object store settings.
    pub store: StoreConfig,
    /// Publish/subscribe broker settings.
    pub pubsub: PubSubConfig,
    /// Read-through cache settings.
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Parses a configuration from a JSON document.
    ///
    /// Missing sections and fields fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result fails
    /// [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Rejects settings that would make a component unusable.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.store.id_generation_attempts > 0,
            "store.id_generation_attempts must be at least 1"
        );
        anyhow::ensure!(
            self.pubsub.listener_queue_capacity != Some(0),
            "pubsub.listener_queue_capacity must be at least 1 when set"
        );
        anyhow::ensure!(
            self.pubsub.failure_channel_capacity > 0,
            "pubsub.failure_channel_capacity must be at least 1"
        );
        anyhow::ensure!(self.cache.default_ttl_ms > 0, "cache.default_ttl_ms must be positive");
        if let Some((name, _)) = self.cache.ttl_overrides_ms.iter().find(|(_, ttl)| **ttl == 0) {
            anyhow::bail!("cache.ttl_overrides_ms.{name} must be positive");
        }
        Ok(())
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How many random identifiers `put` tries before giving up on a record
    /// without an id.
    pub id_generation_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            id_generation_attempts: 16,
        }
    }
}

/// Publish/subscribe broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubSubConfig {
    /// Optional queue bound per subscription. `None` (the default) queues
    /// without limit, so every subscriber sees every message. With a bound,
    /// a publish that finds the queue full drops that subscriber's copy and
    /// reports a failure.
    pub listener_queue_capacity: Option<usize>,
    /// Capacity of the delivery-failure broadcast channel.
    pub failure_channel_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            listener_queue_capacity: None,
            failure_channel_capacity: 64,
        }
    }
}

/// Read-through cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied to caches without an override.
    pub default_ttl_ms: u64,
    /// Per-cache-name TTL overrides.
    pub ttl_overrides_ms: HashMap<String, u64>,
    /// Interval of the background expiry sweep. 0 = lazy expiry only.
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 600_000,
            ttl_overrides_ms: HashMap::new(),
            sweep_interval_ms: 0,
        }
    }
}

impl CacheConfig {
    /// TTL for the named cache, honoring overrides.
    #[must_use]
    pub fn ttl_for(&self, name: &str) -> Duration {
        let ms = self
            .ttl_overrides_ms
            .get(name)
            .copied()
            .unwrap_or(self.default_ttl_ms);
        Duration::from_millis(ms)
    }
}
