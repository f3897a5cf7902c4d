//! Cache Sweeper Service
//!
//! Background task that prunes expired cache entries on a fixed interval

use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use crate::config::CacheConfig;
use crate::services::cache_service::CacheService;

#[derive(Debug, Clone)]
pub struct CacheSweeperConfig {
    pub interval_secs: u64,
    pub enabled: bool,
}

impl From<&CacheConfig> for CacheSweeperConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            interval_secs: config.cleanup_interval_secs.max(1),
            enabled: config.cleanup_enabled,
        }
    }
}

#[derive(Clone)]
pub struct CacheSweeper {
    cache: CacheService,
    config: CacheSweeperConfig,
}

impl CacheSweeper {
    pub fn new(cache: CacheService, config: CacheSweeperConfig) -> Self {
        Self { cache, config }
    }

    /// Start the sweep loop. Runs until the task is dropped.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Cache sweeper is disabled");
            return;
        }

        info!("Starting cache sweeper with {}s interval", self.config.interval_secs);

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; skip it so startup is not a sweep
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// One sweep; failures are logged inside the cache service.
    /// Returns the number of expired cache entries removed.
    pub async fn run_once(&self) -> usize {
        let cleaned = self.cache.cleanup_expired().await;
        let purged = self.cache.purge_backend_expired().await;
        info!(cleaned, purged, "Cache sweep finished");
        cleaned
    }
}
