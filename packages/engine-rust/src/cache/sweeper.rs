use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::manager::CacheManager;
use crate::worker::BackgroundRunnable;

/// Work items accepted by the [`ExpirySweeper`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepTask {
    /// Evict expired entries from every registered cache.
    RunFull,
    /// Evict expired entries from one named cache.
    RunCache { name: String },
}

/// Background runnable that evicts expired cache entries on each tick and
/// on demand.
pub struct ExpirySweeper {
    caches: Arc<CacheManager>,
}

impl ExpirySweeper {
    #[must_use]
    pub fn new(caches: Arc<CacheManager>) -> Self {
        Self { caches }
    }
}

#[async_trait]
impl BackgroundRunnable for ExpirySweeper {
    type Task = SweepTask;

    fn name(&self) -> &'static str {
        "cache-expiry-sweeper"
    }

    async fn run(&mut self, task: SweepTask) {
        match task {
            SweepTask::RunFull => {
                self.caches.evict_expired();
            }
            SweepTask::RunCache { name } => {
                if self.caches.evict_expired_in(&name).is_none() {
                    debug!(cache = %name, "sweep requested for unknown cache");
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        self.caches.evict_expired();
    }
}
