//! Retention Enforcement
//!
//! Applies a policy's disposition strategy to the rows that fell out of
//! its window.
//!
//! ## Safety Guarantees
//!
//! - Every policy runs under the entity lock shared with admin triggers
//! - Archive copies rows before deleting them, inside one transaction
//! - Delete and compress work in bounded batches; committed batches count
//!   even if a later batch fails
//! - Dry-run mode reports qualifying rows without touching them

use std::sync::Arc;

use chrono::Utc;
use common::config::{RetentionConfig, Strategy, Sweep};
use common::store::{RelationalStore, RowFilter, StoreError, archive_table_name};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::policy::{PolicyRegistry, RetentionPolicy};
use crate::cache::CacheInvalidator;
use crate::error::MaintenanceError;
use crate::locks::EntityLocks;
use crate::metrics::MaintenanceMetrics;

/// Result of applying one policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOutcome {
    pub entity_type: String,
    pub strategy: Strategy,
    pub processed: u64,
    pub dry_run: bool,
}

/// A policy that failed during a sweep, with the rows it still processed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFailure {
    pub entity_type: String,
    pub strategy: Strategy,
    pub processed: u64,
    pub message: String,
}

/// Aggregate result of a retention sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    pub deleted: u64,
    pub archived: u64,
    pub compressed: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PolicyFailure>,
}

impl CleanupSummary {
    fn add(&mut self, strategy: Strategy, processed: u64) {
        match strategy {
            Strategy::Delete => self.deleted += processed,
            Strategy::Archive => self.archived += processed,
            Strategy::Compress => self.compressed += processed,
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.deleted + self.archived + self.compressed
    }
}

/// Executes retention policies against the store.
#[derive(Clone)]
pub struct ArchiveExecutor {
    store: Arc<dyn RelationalStore>,
    registry: Arc<PolicyRegistry>,
    locks: EntityLocks,
    invalidator: CacheInvalidator,
    metrics: MaintenanceMetrics,
    batch_size: usize,
    dry_run: bool,
}

impl ArchiveExecutor {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        registry: Arc<PolicyRegistry>,
        locks: EntityLocks,
        invalidator: CacheInvalidator,
        metrics: MaintenanceMetrics,
        config: &RetentionConfig,
    ) -> Self {
        Self {
            store,
            registry,
            locks,
            invalidator,
            metrics,
            batch_size: config.batch_size.max(1),
            dry_run: config.dry_run,
        }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    /// Apply one policy while holding its entity lock.
    pub async fn apply_policy(
        &self,
        policy: &RetentionPolicy,
    ) -> Result<PolicyOutcome, MaintenanceError> {
        let _guard = self.locks.acquire(&policy.entity_type).await;
        let now = Utc::now();
        let filter = policy.row_filter(now);

        info!(
            entity_type = %policy.entity_type,
            strategy = %policy.strategy,
            cutoff = %filter.cutoff.to_rfc3339(),
            dry_run = self.dry_run,
            "Applying retention policy"
        );

        if self.dry_run {
            let processed = self.store.count_expired(&filter).await.map_err(|source| {
                MaintenanceError::PolicyExecution {
                    entity_type: policy.entity_type.clone(),
                    strategy: policy.strategy,
                    processed: 0,
                    source,
                }
            })?;
            info!(
                entity_type = %policy.entity_type,
                qualifying_rows = processed,
                "Dry run: retention policy not applied"
            );
            return Ok(PolicyOutcome {
                entity_type: policy.entity_type.clone(),
                strategy: policy.strategy,
                processed,
                dry_run: true,
            });
        }

        let result = match policy.strategy {
            Strategy::Delete => self.delete_in_batches(&filter).await,
            Strategy::Archive => self.archive(&filter).await,
            Strategy::Compress => self.compress_in_batches(policy, &filter).await,
        };

        let processed = match &result {
            Ok(processed) => *processed,
            Err((processed, _)) => *processed,
        };
        match policy.strategy {
            Strategy::Delete => self.metrics.record_rows_deleted(processed),
            Strategy::Archive => self.metrics.record_rows_archived(processed),
            Strategy::Compress => self.metrics.record_rows_compressed(processed),
        }
        if processed > 0 {
            self.invalidator
                .invalidate_entity(&policy.entity_type)
                .await;
        }

        match result {
            Ok(processed) => {
                info!(
                    entity_type = %policy.entity_type,
                    strategy = %policy.strategy,
                    processed,
                    "Retention policy applied"
                );
                Ok(PolicyOutcome {
                    entity_type: policy.entity_type.clone(),
                    strategy: policy.strategy,
                    processed,
                    dry_run: false,
                })
            }
            Err((processed, source)) => {
                self.metrics.record_policy_failure();
                Err(MaintenanceError::PolicyExecution {
                    entity_type: policy.entity_type.clone(),
                    strategy: policy.strategy,
                    processed,
                    source,
                })
            }
        }
    }

    /// Apply every policy enforced by `sweep`. Failures are collected, not
    /// propagated, and their partial counts are included.
    pub async fn apply_sweep(&self, sweep: Sweep) -> CleanupSummary {
        let mut summary = CleanupSummary::default();

        for policy in self.registry.policies_for_sweep(sweep) {
            match self.apply_policy(policy).await {
                Ok(outcome) => summary.add(outcome.strategy, outcome.processed),
                Err(MaintenanceError::PolicyExecution {
                    entity_type,
                    strategy,
                    processed,
                    source,
                }) => {
                    warn!(
                        entity_type = %entity_type,
                        strategy = %strategy,
                        processed,
                        error = %source,
                        "Retention policy failed"
                    );
                    summary.add(strategy, processed);
                    summary.failures.push(PolicyFailure {
                        entity_type,
                        strategy,
                        processed,
                        message: source.to_string(),
                    });
                }
                Err(other) => {
                    warn!(
                        entity_type = %policy.entity_type,
                        error = %other,
                        "Retention policy failed"
                    );
                    summary.failures.push(PolicyFailure {
                        entity_type: policy.entity_type.clone(),
                        strategy: policy.strategy,
                        processed: 0,
                        message: other.to_string(),
                    });
                }
            }
        }

        info!(
            sweep = ?sweep,
            deleted = summary.deleted,
            archived = summary.archived,
            compressed = summary.compressed,
            failures = summary.failures.len(),
            "Retention sweep completed"
        );
        summary
    }

    /// Apply every registered policy.
    pub async fn cleanup_old_data(&self) -> CleanupSummary {
        self.apply_sweep(Sweep::Monthly).await
    }

    async fn delete_in_batches(&self, filter: &RowFilter) -> Result<u64, (u64, StoreError)> {
        let mut processed = 0u64;
        loop {
            let removed = self
                .store
                .delete_expired(filter, self.batch_size)
                .await
                .map_err(|e| (processed, e))?;
            processed += removed;
            debug!(table = %filter.table, removed, processed, "Delete batch committed");
            if (removed as usize) < self.batch_size {
                return Ok(processed);
            }
            tokio::task::yield_now().await;
        }
    }

    async fn archive(&self, filter: &RowFilter) -> Result<u64, (u64, StoreError)> {
        let archive_table = archive_table_name(&filter.table);
        self.store
            .archive_expired(filter, &archive_table)
            .await
            .map_err(|e| (0, e))
    }

    async fn compress_in_batches(
        &self,
        policy: &RetentionPolicy,
        filter: &RowFilter,
    ) -> Result<u64, (u64, StoreError)> {
        let column = policy.compress_column.as_deref().ok_or_else(|| {
            (
                0,
                StoreError::InvalidIdentifier(format!(
                    "missing compress column for {}",
                    policy.entity_type
                )),
            )
        })?;

        let compressed_at = Utc::now();
        let mut processed = 0u64;
        loop {
            let rewritten = self
                .store
                .compress_expired(filter, column, compressed_at, self.batch_size)
                .await
                .map_err(|e| (processed, e))?;
            processed += rewritten;
            debug!(table = %filter.table, rewritten, processed, "Compress batch committed");
            if (rewritten as usize) < self.batch_size {
                return Ok(processed);
            }
            tokio::task::yield_now().await;
        }
    }
}
