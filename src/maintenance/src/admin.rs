//! Operator-facing reads and triggers. Callers are already authorized.

use std::sync::Arc;

use tracing::info;

use crate::collector::StorageMetric;
use crate::engine::MaintenanceEngine;
use crate::error::MaintenanceError;
use crate::retention::CleanupSummary;
use crate::scheduler::{MaintenanceJob, MaintenanceScheduler};

#[derive(Clone)]
pub struct AdminSurface {
    engine: Arc<MaintenanceEngine>,
    scheduler: Arc<MaintenanceScheduler>,
}

impl AdminSurface {
    pub fn new(engine: Arc<MaintenanceEngine>, scheduler: Arc<MaintenanceScheduler>) -> Self {
        Self { engine, scheduler }
    }

    pub async fn get_storage_metrics(&self) -> Vec<StorageMetric> {
        self.engine.collector().collect().await
    }

    pub fn get_maintenance_jobs(&self) -> Vec<MaintenanceJob> {
        self.scheduler.jobs()
    }

    pub async fn get_optimization_recommendations(&self) -> Vec<String> {
        let collector = self.engine.collector();
        let metrics = collector.collect().await;
        collector.recommendations(&metrics)
    }

    /// Run every retention policy now, on the same path as the monthly sweep.
    ///
    /// Any failed policy fails the request; the summary is logged either way.
    pub async fn manual_cleanup(&self) -> Result<CleanupSummary, MaintenanceError> {
        let metrics = self.engine.metrics();
        metrics.record_job_started();
        info!("Manual cleanup requested");

        let summary = self.engine.executor().cleanup_old_data().await;
        if summary.has_failures() {
            metrics.record_job_failed();
            return Err(MaintenanceError::routine(
                "manual-cleanup",
                summary
                    .failures
                    .iter()
                    .map(|f| format!("{}: {}", f.entity_type, f.message))
                    .collect(),
            ));
        }

        metrics.record_job_succeeded();
        Ok(summary)
    }

    /// Refresh statistics and rebuild indexes for every watched entity.
    pub async fn optimize_indexes(&self) -> Result<String, MaintenanceError> {
        let mut failures = self.engine.refresh_statistics().await;
        failures.extend(self.engine.optimize_indexes().await);
        if !failures.is_empty() {
            return Err(MaintenanceError::routine("optimize-indexes", failures));
        }

        let entities = self.engine.collector().watch_list().len();
        info!(entities, "Manual index optimization completed");
        Ok(format!("Index optimization completed for {entities} entities"))
    }

    pub async fn clear_cache(&self) -> usize {
        self.engine.invalidator().flush().await
    }
}
