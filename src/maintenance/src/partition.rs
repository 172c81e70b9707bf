//! Forward time-range partitions for append-heavy entities.
//!
//! Partitions are named `{parent}_{label}` where the label is `YYYY_MM` for
//! monthly and `YYYY_wWW` (ISO week) for weekly granularity. Every
//! partition is recorded in the store's registry table, which is what makes
//! creation idempotent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use common::config::{PartitionConfig, PartitionGranularity};
use common::store::{PartitionRecord, PartitionSpec, RelationalStore};
use tracing::{debug, info, warn};

use crate::cache::CacheInvalidator;
use crate::error::MaintenanceError;
use crate::locks::EntityLocks;
use crate::metrics::MaintenanceMetrics;

/// Start of the period containing `ts`.
fn period_start(granularity: PartitionGranularity, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date = ts.date_naive();
    let start = match granularity {
        PartitionGranularity::Weekly => date
            .checked_sub_days(chrono::Days::new(
                date.weekday().num_days_from_monday() as u64,
            ))?,
        PartitionGranularity::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?,
    };
    Some(start.and_time(NaiveTime::MIN).and_utc())
}

/// Start of the period following the one starting at `start`.
fn next_period(granularity: PartitionGranularity, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date = start.date_naive();
    let next = match granularity {
        PartitionGranularity::Weekly => date.checked_add_days(chrono::Days::new(7))?,
        PartitionGranularity::Monthly => date.checked_add_months(chrono::Months::new(1))?,
    };
    Some(next.and_time(NaiveTime::MIN).and_utc())
}

fn period_label(granularity: PartitionGranularity, start: DateTime<Utc>) -> String {
    match granularity {
        PartitionGranularity::Weekly => {
            let week = start.iso_week();
            format!("{}_w{:02}", week.year(), week.week())
        }
        PartitionGranularity::Monthly => format!("{}_{:02}", start.year(), start.month()),
    }
}

/// Result of ensuring partitions for every configured entity
#[derive(Debug, Clone, Default)]
pub struct PartitionReport {
    pub created: usize,
    pub failures: Vec<String>,
}

pub struct PartitionManager {
    store: Arc<dyn RelationalStore>,
    entities: HashMap<String, PartitionConfig>,
    order: Vec<String>,
    locks: EntityLocks,
    invalidator: CacheInvalidator,
    metrics: MaintenanceMetrics,
}

impl PartitionManager {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        configs: &[PartitionConfig],
        locks: EntityLocks,
        invalidator: CacheInvalidator,
        metrics: MaintenanceMetrics,
    ) -> Self {
        let order = configs.iter().map(|c| c.entity_type.clone()).collect();
        let entities = configs
            .iter()
            .map(|c| (c.entity_type.clone(), c.clone()))
            .collect();
        Self {
            store,
            entities,
            order,
            locks,
            invalidator,
            metrics,
        }
    }

    fn config(&self, entity_type: &str) -> Result<&PartitionConfig, MaintenanceError> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| MaintenanceError::UnknownPartitionedEntity(entity_type.to_string()))
    }

    /// Create the partition covering `[start, end)`.
    ///
    /// Returns `Ok(false)` when the identical partition already exists. A
    /// range overlapping a different existing partition is rejected.
    pub async fn create_partition(
        &self,
        entity_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, MaintenanceError> {
        let config = self.config(entity_type)?;
        if start >= end {
            return Err(MaintenanceError::InvalidPartitionRange {
                entity_type: entity_type.to_string(),
                start,
                end,
            });
        }

        let _guard = self.locks.acquire(entity_type).await;

        let existing = self.store.list_partitions(entity_type).await?;
        if existing.iter().any(|p| p.same_range(start, end)) {
            debug!(entity_type = %entity_type, %start, %end, "Partition already exists");
            return Ok(false);
        }
        if let Some(overlapping) = existing.iter().find(|p| p.overlaps(start, end)) {
            return Err(MaintenanceError::PartitionOverlap {
                entity_type: entity_type.to_string(),
                start,
                end,
                existing: overlapping.name.clone(),
            });
        }

        let label = period_label(config.granularity, start);
        let spec = PartitionSpec {
            parent: entity_type.to_string(),
            name: format!("{entity_type}_{label}"),
            label,
            range_start: start,
            range_end: end,
        };

        let created = self.store.create_partition(&spec).await?;
        if !created {
            return Ok(false);
        }

        if !self.store.propagates_partition_indexes() {
            for index in &config.indexes {
                let index_name = format!("{}_{}", spec.name, index.name);
                self.store
                    .create_index(&spec.name, &index_name, &index.columns)
                    .await?;
            }
        }

        self.metrics.record_partitions_created(1);
        self.invalidator.invalidate_entity(entity_type).await;
        info!(
            entity_type = %entity_type,
            partition = %spec.name,
            range_start = %start,
            range_end = %end,
            "Partition created"
        );
        Ok(true)
    }

    /// Make sure partitions cover every instant from the start of the current
    /// period through `now + horizon`.
    pub async fn ensure_future_partitions(
        &self,
        entity_type: &str,
        horizon: Duration,
    ) -> Result<usize, MaintenanceError> {
        self.ensure_future_partitions_at(entity_type, horizon, Utc::now())
            .await
    }

    /// [`Self::ensure_future_partitions`] with an explicit "now".
    pub async fn ensure_future_partitions_at(
        &self,
        entity_type: &str,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, MaintenanceError> {
        let granularity = self.config(entity_type)?.granularity;
        let out_of_range = || MaintenanceError::InvalidPartitionRange {
            entity_type: entity_type.to_string(),
            start: now,
            end: now,
        };
        let covered_until = chrono::Duration::from_std(horizon)
            .ok()
            .and_then(|horizon| now.checked_add_signed(horizon))
            .ok_or_else(out_of_range)?;

        let mut start = period_start(granularity, now).ok_or_else(out_of_range)?;
        let mut periods = 0;
        let mut created = 0;
        loop {
            let end = next_period(granularity, start).ok_or_else(out_of_range)?;
            if self.create_partition(entity_type, start, end).await? {
                created += 1;
            }
            periods += 1;
            if end > covered_until {
                break;
            }
            start = end;
        }

        info!(
            entity_type = %entity_type,
            horizon = %humantime::format_duration(horizon),
            periods,
            created,
            "Future partitions ensured"
        );
        Ok(created)
    }

    /// Ensure the configured horizon for every partitioned entity.
    pub async fn ensure_all(&self) -> PartitionReport {
        let mut report = PartitionReport::default();
        for entity_type in &self.order {
            let Some(config) = self.entities.get(entity_type) else {
                continue;
            };
            match self
                .ensure_future_partitions(entity_type, config.horizon)
                .await
            {
                Ok(created) => report.created += created,
                Err(e) => {
                    warn!(entity_type = %entity_type, error = %e, "Failed to ensure partitions");
                    report.failures.push(format!("{entity_type}: {e}"));
                }
            }
        }
        report
    }

    pub async fn list_partitions(
        &self,
        entity_type: &str,
    ) -> Result<Vec<PartitionRecord>, MaintenanceError> {
        self.config(entity_type)?;
        Ok(self.store.list_partitions(entity_type).await?)
    }
}
