//! Storage footprint collection for watched entity types.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::config::MetricsConfig;
use common::store::RelationalStore;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::MaintenanceError;

const MIB: u64 = 1024 * 1024;

/// Footprint of one entity type at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetric {
    pub entity_type: String,
    pub record_count: u64,
    /// Unknown when the store only reports whole-database sizes
    pub size_bytes: Option<u64>,
    pub captured_at: DateTime<Utc>,
    pub optimization_needed: bool,
}

pub struct MetricsCollector {
    store: Arc<dyn RelationalStore>,
    watch_list: Vec<String>,
    record_threshold: u64,
    size_threshold_bytes: u64,
}

impl MetricsCollector {
    pub fn new(store: Arc<dyn RelationalStore>, config: &MetricsConfig) -> Self {
        Self {
            store,
            watch_list: config.watch_list.clone(),
            record_threshold: config.record_threshold,
            size_threshold_bytes: config.size_threshold_bytes,
        }
    }

    pub fn watch_list(&self) -> &[String] {
        &self.watch_list
    }

    /// Collect a metric for every watched entity. Entities that fail are
    /// logged and left out; the others are still reported.
    pub async fn collect(&self) -> Vec<StorageMetric> {
        let results = join_all(self.watch_list.iter().map(|e| self.collect_entity(e))).await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(metric) => Some(metric),
                Err(e) => {
                    warn!(error = %e, "Skipping entity in storage metrics collection");
                    None
                }
            })
            .collect()
    }

    pub async fn collect_entity(&self, entity_type: &str) -> Result<StorageMetric, MaintenanceError> {
        let failed = |source| MaintenanceError::EntityCollection {
            entity_type: entity_type.to_string(),
            source,
        };

        let record_count = self.store.count_rows(entity_type).await.map_err(failed)?;
        let size_bytes = self
            .store
            .table_size_bytes(entity_type)
            .await
            .map_err(failed)?;

        let metric = StorageMetric {
            entity_type: entity_type.to_string(),
            record_count,
            size_bytes,
            captured_at: Utc::now(),
            optimization_needed: self.exceeds_thresholds(record_count, size_bytes),
        };
        debug!(
            entity_type = %entity_type,
            record_count,
            size_bytes = ?size_bytes,
            optimization_needed = metric.optimization_needed,
            "Collected storage metric"
        );
        Ok(metric)
    }

    fn exceeds_thresholds(&self, record_count: u64, size_bytes: Option<u64>) -> bool {
        record_count > self.record_threshold || self.exceeds_size(size_bytes)
    }

    fn exceeds_size(&self, size_bytes: Option<u64>) -> bool {
        size_bytes.is_some_and(|size| size > self.size_threshold_bytes)
    }

    /// Advisory strings for entities over a threshold.
    pub fn recommendations(&self, metrics: &[StorageMetric]) -> Vec<String> {
        let mut recommendations = Vec::new();
        for metric in metrics {
            if metric.record_count > self.record_threshold {
                recommendations.push(format!(
                    "{} has {} records, consider archiving",
                    metric.entity_type, metric.record_count
                ));
            }
            if let Some(size) = metric.size_bytes.filter(|size| *size > self.size_threshold_bytes) {
                recommendations.push(format!(
                    "{} uses {} MiB, consider compressing or partitioning",
                    metric.entity_type,
                    size.div_ceil(MIB)
                ));
            }
        }
        recommendations
    }
}
