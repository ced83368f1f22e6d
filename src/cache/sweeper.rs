//! Periodic removal of expired cache entries.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::cache::store::ResponseCache;
use crate::observability::metrics;

pub struct CacheSweeper {
    cache: ResponseCache,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(cache: ResponseCache, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval = ?self.interval, "Cache sweeper starting");

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; nothing can be expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.cache.purge_expired();
                    metrics::record_cache_size(self.cache.len());
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.cache.len(), "Purged expired cache entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
