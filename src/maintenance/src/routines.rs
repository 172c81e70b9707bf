//! The standard maintenance routines and their schedule.
//!
//! Every routine runs all of its steps; failures are collected and turn
//! the run into a [`MaintenanceError::Routine`] once the last step is done.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::{SchedulerConfig, Sweep};
use tracing::{info, warn};

use crate::engine::MaintenanceEngine;
use crate::error::MaintenanceError;
use crate::retention::CleanupSummary;
use crate::scheduler::{Cadence, MaintenanceRoutine, MaintenanceScheduler};

pub const REFRESH_STATISTICS: &str = "refresh-statistics";
pub const CACHE_SWEEP: &str = "cache-sweep";
pub const DAILY_CLEANUP: &str = "daily-cleanup";
pub const WEEKLY_OPTIMIZATION: &str = "weekly-optimization";
pub const MONTHLY_MAINTENANCE: &str = "monthly-maintenance";

fn finish(routine: &str, failures: Vec<String>) -> Result<(), MaintenanceError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(MaintenanceError::routine(routine, failures))
    }
}

fn sweep_failures(summary: &CleanupSummary) -> Vec<String> {
    summary
        .failures
        .iter()
        .map(|f| format!("{}: {}", f.entity_type, f.message))
        .collect()
}

pub struct RefreshStatistics {
    engine: Arc<MaintenanceEngine>,
}

#[async_trait]
impl MaintenanceRoutine for RefreshStatistics {
    async fn run(&self) -> Result<(), MaintenanceError> {
        finish(REFRESH_STATISTICS, self.engine.refresh_statistics().await)
    }
}

pub struct CacheSweep {
    engine: Arc<MaintenanceEngine>,
}

#[async_trait]
impl MaintenanceRoutine for CacheSweep {
    async fn run(&self) -> Result<(), MaintenanceError> {
        self.engine.invalidator().sweep().await;
        Ok(())
    }
}

/// Daily-sweep retention policies and stale temporary uploads.
pub struct DailyCleanup {
    engine: Arc<MaintenanceEngine>,
}

#[async_trait]
impl MaintenanceRoutine for DailyCleanup {
    async fn run(&self) -> Result<(), MaintenanceError> {
        let summary = self.engine.executor().apply_sweep(Sweep::Daily).await;
        let mut failures = sweep_failures(&summary);

        let janitor = self.engine.janitor();
        if janitor.is_enabled() {
            match janitor.purge_temp_files().await {
                Ok(report) => failures.extend(
                    report
                        .failures
                        .into_iter()
                        .map(|(path, e)| format!("{path}: {e}")),
                ),
                Err(e) => failures.push(format!("temp files: {e}")),
            }
        }

        finish(DAILY_CLEANUP, failures)
    }
}

/// Index rebuild, materialized views, weekly policies, then statistics.
pub struct WeeklyOptimization {
    engine: Arc<MaintenanceEngine>,
}

#[async_trait]
impl MaintenanceRoutine for WeeklyOptimization {
    async fn run(&self) -> Result<(), MaintenanceError> {
        let mut failures = self.engine.optimize_indexes().await;
        failures.extend(self.engine.refresh_materialized_views().await);

        let summary = self.engine.executor().apply_sweep(Sweep::Weekly).await;
        failures.extend(sweep_failures(&summary));

        failures.extend(self.engine.refresh_statistics().await);
        finish(WEEKLY_OPTIMIZATION, failures)
    }
}

/// Full retention sweep, partition horizon, space reclaim, unreferenced
/// uploads and the metrics report.
pub struct MonthlyMaintenance {
    engine: Arc<MaintenanceEngine>,
}

#[async_trait]
impl MaintenanceRoutine for MonthlyMaintenance {
    async fn run(&self) -> Result<(), MaintenanceError> {
        let summary = self.engine.executor().cleanup_old_data().await;
        let mut failures = sweep_failures(&summary);

        let partitions = self.engine.partitions().ensure_all().await;
        info!(created = partitions.created, "Partition horizon ensured");
        failures.extend(partitions.failures);

        failures.extend(self.engine.reclaim_space().await);

        let janitor = self.engine.janitor();
        if janitor.is_enabled() {
            match self.engine.file_references() {
                Some(references) => match janitor.remove_unreferenced(&references).await {
                    Ok(report) => failures.extend(
                        report
                            .failures
                            .into_iter()
                            .map(|(path, e)| format!("{path}: {e}")),
                    ),
                    Err(e) => failures.push(format!("uploads: {e}")),
                },
                None => {
                    warn!("No reference query configured, skipping unreferenced upload cleanup")
                }
            }
        }

        self.engine.metrics_report().await;
        finish(MONTHLY_MAINTENANCE, failures)
    }
}

/// Register the five standard jobs with the configured cadences.
pub fn register_standard_jobs(
    scheduler: &mut MaintenanceScheduler,
    engine: Arc<MaintenanceEngine>,
    config: &SchedulerConfig,
    now: DateTime<Utc>,
) -> Result<(), MaintenanceError> {
    scheduler.register(
        REFRESH_STATISTICS,
        Cadence::EveryFourHours,
        Arc::new(RefreshStatistics {
            engine: engine.clone(),
        }),
        now,
    )?;
    scheduler.register(
        CACHE_SWEEP,
        Cadence::EverySixHours,
        Arc::new(CacheSweep {
            engine: engine.clone(),
        }),
        now,
    )?;
    scheduler.register(
        DAILY_CLEANUP,
        Cadence::Daily {
            hour: config.daily_hour,
        },
        Arc::new(DailyCleanup {
            engine: engine.clone(),
        }),
        now,
    )?;
    scheduler.register(
        WEEKLY_OPTIMIZATION,
        Cadence::Weekly {
            weekday: config.weekly_day,
            hour: config.weekly_hour,
        },
        Arc::new(WeeklyOptimization {
            engine: engine.clone(),
        }),
        now,
    )?;
    scheduler.register(
        MONTHLY_MAINTENANCE,
        Cadence::Monthly {
            hour: config.monthly_hour,
        },
        Arc::new(MonthlyMaintenance { engine }),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MaintenanceMetrics;
    use crate::scheduler::JobStatus;
    use chrono::{Duration, TimeZone};
    use common::cache::InMemoryQueryCache;
    use common::config::{CacheConfig, Configuration, PartitionGranularity, PolicyConfig, Strategy};
    use common::testing::{FakeStore, TestConfigBuilder};

    const DAY: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

    fn engine(store: &FakeStore, config: &Configuration) -> Arc<MaintenanceEngine> {
        Arc::new(
            MaintenanceEngine::new(
                config,
                Arc::new(store.clone()),
                Arc::new(InMemoryQueryCache::new(&CacheConfig::default())),
            )
            .unwrap(),
        )
    }

    fn aged(days: i64) -> impl Iterator<Item = DateTime<Utc>> {
        let now = Utc::now();
        (0..days).map(move |d| now - Duration::days(d) - Duration::hours(12))
    }

    #[tokio::test]
    async fn test_standard_jobs_registered() {
        let store = FakeStore::new();
        let config = TestConfigBuilder::new().build();
        let mut scheduler =
            MaintenanceScheduler::new(&config.scheduler, MaintenanceMetrics::new()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        register_standard_jobs(&mut scheduler, engine(&store, &config), &config.scheduler, now).unwrap();

        let jobs = scheduler.jobs();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                REFRESH_STATISTICS,
                CACHE_SWEEP,
                DAILY_CLEANUP,
                WEEKLY_OPTIMIZATION,
                MONTHLY_MAINTENANCE
            ]
        );
        assert_eq!(jobs[0].next_run, Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap());
        assert_eq!(jobs[2].next_run, Utc.with_ymd_and_hms(2026, 3, 5, 2, 0, 0).unwrap());
        assert_eq!(jobs[3].next_run, Utc.with_ymd_and_hms(2026, 3, 8, 3, 0, 0).unwrap());
        assert_eq!(jobs[4].next_run, Utc.with_ymd_and_hms(2026, 4, 1, 4, 0, 0).unwrap());
        assert!(jobs.iter().all(|j| j.status == JobStatus::Idle));
    }

    #[tokio::test]
    async fn test_out_of_range_hour_fails_registration() {
        let store = FakeStore::new();
        let mut config = TestConfigBuilder::new().build();
        config.scheduler.monthly_hour = 24;
        let mut scheduler =
            MaintenanceScheduler::new(&config.scheduler, MaintenanceMetrics::new()).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();

        let err = register_standard_jobs(&mut scheduler, engine(&store, &config), &config.scheduler, now)
            .unwrap_err();
        assert!(matches!(err, MaintenanceError::InvalidCadence { .. }));
        assert!(scheduler.job(MONTHLY_MAINTENANCE).is_none());
    }

    #[tokio::test]
    async fn test_daily_cleanup_applies_daily_policies_only() {
        let store = FakeStore::new();
        store.insert_rows("audit_logs", aged(20));
        store.insert_rows("tasks", aged(20));
        let config = TestConfigBuilder::new()
            .without_defaults()
            .with_policy_config(PolicyConfig {
                sweep: Sweep::Daily,
                ..policy("audit_logs", 10, Strategy::Delete)
            })
            .with_policy("tasks", 10 * DAY, Strategy::Delete)
            .build();
        let routine = DailyCleanup {
            engine: engine(&store, &config),
        };

        routine.run().await.unwrap();
        assert_eq!(store.row_count("audit_logs"), 10);
        assert_eq!(store.row_count("tasks"), 20);
    }

    #[tokio::test]
    async fn test_monthly_maintenance_continues_after_failure() {
        let store = FakeStore::new();
        store.insert_rows("audit_logs", aged(20));
        store.insert_rows("tasks", aged(20));
        store.add_table("events");
        store.fail_table("audit_logs", "relation is locked");
        let config = TestConfigBuilder::new()
            .without_defaults()
            .with_policy("audit_logs", 10 * DAY, Strategy::Delete)
            .with_policy("tasks", 10 * DAY, Strategy::Delete)
            .with_partition("events", PartitionGranularity::Monthly, 60 * DAY)
            .build();
        let engine = engine(&store, &config);
        let routine = MonthlyMaintenance {
            engine: engine.clone(),
        };

        let err = routine.run().await.unwrap_err();
        match err {
            MaintenanceError::Routine { routine, failures } => {
                assert_eq!(routine, MONTHLY_MAINTENANCE);
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("audit_logs:"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Later steps still ran
        assert_eq!(store.row_count("tasks"), 10);
        assert!(engine.metrics().summary().partitions_created >= 2);
        assert!(store.statements().contains(&"VACUUM".to_string()));
    }

    #[tokio::test]
    async fn test_weekly_optimization_order() {
        let store = FakeStore::new();
        store.add_table("tasks");
        let config = TestConfigBuilder::new()
            .without_defaults()
            .with_watched_entity("tasks")
            .build();
        let routine = WeeklyOptimization {
            engine: engine(&store, &config),
        };

        routine.run().await.unwrap();
        assert_eq!(store.statements(), vec!["REINDEX tasks", "ANALYZE tasks"]);
    }

    fn policy(entity_type: &str, days: u64, strategy: Strategy) -> PolicyConfig {
        PolicyConfig {
            entity_type: entity_type.to_string(),
            retention: std::time::Duration::from_secs(days * 24 * 3600),
            strategy,
            selector: None,
            timestamp_column: "created_at".to_string(),
            compress_column: None,
            sweep: Sweep::Monthly,
        }
    }
}
