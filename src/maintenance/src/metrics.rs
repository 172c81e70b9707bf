//! Maintenance Metrics
//!
//! Thread-safe counters for monitoring maintenance operations. The monthly
//! routine logs a [`MetricsSummary`] as its metrics report.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::info;

/// Thread-safe metrics for tracking maintenance operations
#[derive(Debug, Clone)]
pub struct MaintenanceMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Rows permanently removed by delete policies
    rows_deleted: AtomicU64,
    /// Rows moved into archive tables
    rows_archived: AtomicU64,
    /// Rows whose payload was replaced by a summary
    rows_compressed: AtomicU64,
    /// Policy executions that ended in an error
    policy_failures: AtomicUsize,
    /// Partitions created ahead of need
    partitions_created: AtomicUsize,
    /// Scheduled or manual job runs started
    jobs_started: AtomicUsize,
    /// Job runs completed successfully
    jobs_succeeded: AtomicUsize,
    /// Job runs that failed
    jobs_failed: AtomicUsize,
    /// Occurrences skipped because the previous run was still going
    jobs_skipped: AtomicUsize,
    /// Cache entries removed by flushes and sweeps
    cache_entries_cleared: AtomicUsize,
    /// Files removed by the janitor
    files_removed: AtomicUsize,
    /// Bytes freed by the janitor
    bytes_freed: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub rows_deleted: u64,
    pub rows_archived: u64,
    pub rows_compressed: u64,
    pub policy_failures: usize,
    pub partitions_created: usize,
    pub jobs_started: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,
    pub cache_entries_cleared: usize,
    pub files_removed: usize,
    pub bytes_freed: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            rows_deleted = self.rows_deleted,
            rows_archived = self.rows_archived,
            rows_compressed = self.rows_compressed,
            policy_failures = self.policy_failures,
            partitions_created = self.partitions_created,
            jobs_started = self.jobs_started,
            jobs_succeeded = self.jobs_succeeded,
            jobs_failed = self.jobs_failed,
            jobs_skipped = self.jobs_skipped,
            cache_entries_cleared = self.cache_entries_cleared,
            files_removed = self.files_removed,
            bytes_freed = self.bytes_freed,
            "Maintenance metrics report"
        );
    }
}

impl Default for MaintenanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenanceMetrics {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                rows_deleted: AtomicU64::new(0),
                rows_archived: AtomicU64::new(0),
                rows_compressed: AtomicU64::new(0),
                policy_failures: AtomicUsize::new(0),
                partitions_created: AtomicUsize::new(0),
                jobs_started: AtomicUsize::new(0),
                jobs_succeeded: AtomicUsize::new(0),
                jobs_failed: AtomicUsize::new(0),
                jobs_skipped: AtomicUsize::new(0),
                cache_entries_cleared: AtomicUsize::new(0),
                files_removed: AtomicUsize::new(0),
                bytes_freed: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_rows_deleted(&self, count: u64) {
        self.inner.rows_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_archived(&self, count: u64) {
        self.inner.rows_archived.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_rows_compressed(&self, count: u64) {
        self.inner
            .rows_compressed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_policy_failure(&self) {
        self.inner.policy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partitions_created(&self, count: usize) {
        self.inner
            .partitions_created
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_job_started(&self) {
        self.inner.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_succeeded(&self) {
        self.inner.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.inner.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_skipped(&self) {
        self.inner.jobs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_entries_cleared(&self, count: usize) {
        self.inner
            .cache_entries_cleared
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_files_removed(&self, count: usize, bytes: u64) {
        self.inner.files_removed.fetch_add(count, Ordering::Relaxed);
        self.inner.bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn rows_deleted(&self) -> u64 {
        self.inner.rows_deleted.load(Ordering::Relaxed)
    }

    pub fn rows_archived(&self) -> u64 {
        self.inner.rows_archived.load(Ordering::Relaxed)
    }

    pub fn jobs_skipped(&self) -> usize {
        self.inner.jobs_skipped.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> MetricsSummary {
        let i = &self.inner;
        MetricsSummary {
            rows_deleted: i.rows_deleted.load(Ordering::Relaxed),
            rows_archived: i.rows_archived.load(Ordering::Relaxed),
            rows_compressed: i.rows_compressed.load(Ordering::Relaxed),
            policy_failures: i.policy_failures.load(Ordering::Relaxed),
            partitions_created: i.partitions_created.load(Ordering::Relaxed),
            jobs_started: i.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded: i.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: i.jobs_failed.load(Ordering::Relaxed),
            jobs_skipped: i.jobs_skipped.load(Ordering::Relaxed),
            cache_entries_cleared: i.cache_entries_cleared.load(Ordering::Relaxed),
            files_removed: i.files_removed.load(Ordering::Relaxed),
            bytes_freed: i.bytes_freed.load(Ordering::Relaxed),
        }
    }
}
