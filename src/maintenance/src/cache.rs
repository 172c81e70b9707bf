use std::sync::Arc;

use common::cache::QueryCache;
use tracing::{debug, info};

use crate::metrics::MaintenanceMetrics;

/// Clears cached query results after maintenance changes the store.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn QueryCache>,
    metrics: MaintenanceMetrics,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn QueryCache>, metrics: MaintenanceMetrics) -> Self {
        Self { cache, metrics }
    }

    /// Drop every cached entry.
    pub async fn flush(&self) -> usize {
        let cleared = self.cache.invalidate_all().await;
        self.metrics.record_cache_entries_cleared(cleared);
        info!(cleared, "Query cache flushed");
        cleared
    }

    /// Drop entries whose TTL has elapsed.
    pub async fn sweep(&self) -> usize {
        let cleared = self.cache.sweep_expired().await;
        self.metrics.record_cache_entries_cleared(cleared);
        info!(cleared, "Expired query cache entries swept");
        cleared
    }

    /// Drop entries cached for one entity type (keys prefixed `{entity}:`).
    pub async fn invalidate_entity(&self, entity_type: &str) -> usize {
        let cleared = self
            .cache
            .invalidate_prefix(&format!("{entity_type}:"))
            .await;
        self.metrics.record_cache_entries_cleared(cleared);
        debug!(entity_type = %entity_type, cleared, "Entity cache entries invalidated");
        cleared
    }
}
