//! Wiring of the maintenance components around one store and one cache.

use std::sync::Arc;

use common::cache::QueryCache;
use common::config::{Configuration, MaterializedViewConfig};
use common::store::RelationalStore;
use tracing::{info, warn};

use crate::cache::CacheInvalidator;
use crate::collector::MetricsCollector;
use crate::files::{FileJanitor, StoreReferences};
use crate::locks::EntityLocks;
use crate::metrics::{MaintenanceMetrics, MetricsSummary};
use crate::partition::PartitionManager;
use crate::retention::{ArchiveExecutor, PolicyRegistry, RetentionConfigError};

/// Shared handle to every maintenance component.
///
/// Store-wide steps return the failures they hit, one message per entity
/// or view; an empty list means the step succeeded everywhere.
pub struct MaintenanceEngine {
    store: Arc<dyn RelationalStore>,
    executor: ArchiveExecutor,
    collector: MetricsCollector,
    partitions: PartitionManager,
    invalidator: CacheInvalidator,
    janitor: FileJanitor,
    metrics: MaintenanceMetrics,
    views: Vec<MaterializedViewConfig>,
}

impl MaintenanceEngine {
    pub fn new(
        config: &Configuration,
        store: Arc<dyn RelationalStore>,
        cache: Arc<dyn QueryCache>,
    ) -> Result<Self, RetentionConfigError> {
        let registry = Arc::new(PolicyRegistry::new(&config.retention)?);
        let metrics = MaintenanceMetrics::new();
        let locks = EntityLocks::new();
        let invalidator = CacheInvalidator::new(cache, metrics.clone());

        let executor = ArchiveExecutor::new(
            store.clone(),
            registry,
            locks.clone(),
            invalidator.clone(),
            metrics.clone(),
            &config.retention,
        );
        let partitions = PartitionManager::new(
            store.clone(),
            &config.partitions,
            locks,
            invalidator.clone(),
            metrics.clone(),
        );

        Ok(Self {
            collector: MetricsCollector::new(store.clone(), &config.metrics),
            janitor: FileJanitor::new(&config.files, metrics.clone()),
            store,
            executor,
            partitions,
            invalidator,
            metrics,
            views: config.materialized_views.clone(),
        })
    }

    pub fn store(&self) -> &Arc<dyn RelationalStore> {
        &self.store
    }

    pub fn executor(&self) -> &ArchiveExecutor {
        &self.executor
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }

    pub fn partitions(&self) -> &PartitionManager {
        &self.partitions
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    pub fn janitor(&self) -> &FileJanitor {
        &self.janitor
    }

    pub fn metrics(&self) -> &MaintenanceMetrics {
        &self.metrics
    }

    /// Refresh planner statistics for every watched entity.
    pub async fn refresh_statistics(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for entity_type in self.collector.watch_list() {
            if let Err(e) = self.store.refresh_statistics(entity_type).await {
                warn!(entity_type = %entity_type, error = %e, "Statistics refresh failed");
                failures.push(format!("{entity_type}: {e}"));
            }
        }
        info!(
            entities = self.collector.watch_list().len(),
            failures = failures.len(),
            "Statistics refreshed"
        );
        failures
    }

    /// Rebuild the indexes of every watched entity.
    pub async fn optimize_indexes(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for entity_type in self.collector.watch_list() {
            if let Err(e) = self.store.rebuild_indexes(entity_type).await {
                warn!(entity_type = %entity_type, error = %e, "Index rebuild failed");
                failures.push(format!("{entity_type}: {e}"));
            }
        }
        info!(
            entities = self.collector.watch_list().len(),
            failures = failures.len(),
            "Indexes rebuilt"
        );
        failures
    }

    /// Refresh every configured materialized view. Readers keep seeing the
    /// previous contents until a refresh completes.
    pub async fn refresh_materialized_views(&self) -> Vec<String> {
        let mut failures = Vec::new();
        for view in &self.views {
            match self
                .store
                .refresh_materialized_view(&view.name, view.query.as_deref())
                .await
            {
                Ok(()) => {
                    self.invalidator.invalidate_entity(&view.name).await;
                }
                Err(e) => {
                    warn!(view = %view.name, error = %e, "Materialized view refresh failed");
                    failures.push(format!("{}: {e}", view.name));
                }
            }
        }
        failures
    }

    pub async fn reclaim_space(&self) -> Vec<String> {
        match self.store.reclaim_space().await {
            Ok(()) => {
                info!(dialect = %self.store.dialect(), "Storage space reclaimed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Space reclaim failed");
                vec![format!("reclaim: {e}")]
            }
        }
    }

    /// Upload references held in the store, or `None` when no reference
    /// query is configured.
    pub fn file_references(&self) -> Option<StoreReferences> {
        self.janitor
            .reference_query()
            .map(|query| StoreReferences::new(self.store.clone(), query))
    }

    /// Log the counters and current storage recommendations.
    pub async fn metrics_report(&self) -> MetricsSummary {
        let summary = self.metrics.summary();
        summary.log();

        let storage = self.collector.collect().await;
        for recommendation in self.collector.recommendations(&storage) {
            info!(recommendation = %recommendation, "Storage recommendation");
        }
        summary
    }
}
