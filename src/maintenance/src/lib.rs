//! Housekeeper Maintenance Library
//!
//! Keeps a relational store's footprint bounded:
//! - Retention policies that delete, archive or compress expired rows
//! - Storage metrics and optimization recommendations
//! - Time-range partitions created ahead of need
//! - Recurring maintenance jobs on fixed cadences
//! - Query cache invalidation after maintenance changes data

pub mod admin;
pub mod cache;
pub mod collector;
pub mod engine;
pub mod error;
pub mod files;
pub mod locks;
pub mod metrics;
pub mod partition;
pub mod retention;
pub mod routines;
pub mod scheduler;

pub use admin::AdminSurface;
pub use cache::CacheInvalidator;
pub use collector::{MetricsCollector, StorageMetric};
pub use engine::MaintenanceEngine;
pub use error::MaintenanceError;
pub use files::{FileCleanupReport, FileJanitor, ReferenceSource, StoreReferences};
pub use locks::EntityLocks;
pub use metrics::{MaintenanceMetrics, MetricsSummary};
pub use partition::{PartitionManager, PartitionReport};
pub use retention::{
    ArchiveExecutor, CleanupSummary, PolicyRegistry, RetentionConfigError, RetentionPolicy,
};
pub use routines::register_standard_jobs;
pub use scheduler::{Cadence, JobStatus, MaintenanceJob, MaintenanceRoutine, MaintenanceScheduler};
