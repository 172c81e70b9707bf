#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use common::cache::InMemoryQueryCache;
use common::config::{CacheConfig, Configuration, DatabaseConfig};
use common::store::{RelationalStore, SqlStore, format_timestamp};
use maintenance::{
    AdminSurface, MaintenanceEngine, MaintenanceMetrics, MaintenanceScheduler,
    register_standard_jobs,
};
use std::sync::Arc;

pub const DAY: std::time::Duration = std::time::Duration::from_secs(24 * 3600);

pub async fn sqlite_store() -> Arc<SqlStore> {
    Arc::new(
        SqlStore::connect(&DatabaseConfig::in_memory())
            .await
            .expect("in-memory SQLite"),
    )
}

/// Table shaped like the application's log entities.
pub async fn create_entity_table(store: &SqlStore, table: &str) {
    store
        .execute(&format!(
            "CREATE TABLE {table} (\
                id INTEGER PRIMARY KEY, \
                created_at TEXT NOT NULL, \
                is_read INTEGER NOT NULL DEFAULT 0, \
                metadata TEXT)"
        ))
        .await
        .expect("create table");
}

/// Insert one row per age in days, half a day past each boundary.
pub async fn insert_aged(
    store: &SqlStore,
    table: &str,
    ages_in_days: impl IntoIterator<Item = i64>,
    now: DateTime<Utc>,
) {
    for (i, age) in ages_in_days.into_iter().enumerate() {
        let created_at = format_timestamp(now - Duration::days(age) - Duration::hours(12));
        store
            .execute(&format!(
                "INSERT INTO {table} (created_at, is_read, metadata) \
                 VALUES ('{created_at}', {}, '{{\"message\":\"row {i}\"}}')",
                i % 2
            ))
            .await
            .expect("insert row");
    }
}

/// Insert `count` identical fresh rows in one statement.
pub async fn insert_bulk(store: &SqlStore, table: &str, count: u64) {
    let created_at = format_timestamp(Utc::now());
    store
        .execute(&format!(
            "INSERT INTO {table} (created_at) \
             WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {count}) \
             SELECT '{created_at}' FROM seq"
        ))
        .await
        .expect("bulk insert");
}

pub fn engine(config: &Configuration, store: Arc<SqlStore>) -> Arc<MaintenanceEngine> {
    let store: Arc<dyn RelationalStore> = store;
    Arc::new(
        MaintenanceEngine::new(
            config,
            store,
            Arc::new(InMemoryQueryCache::new(&CacheConfig::default())),
        )
        .expect("valid configuration"),
    )
}

pub fn admin(config: &Configuration, engine: Arc<MaintenanceEngine>) -> AdminSurface {
    let mut scheduler = MaintenanceScheduler::new(&config.scheduler, MaintenanceMetrics::new())
        .expect("valid scheduler configuration");
    register_standard_jobs(&mut scheduler, engine.clone(), &config.scheduler, Utc::now())
        .expect("valid cadences");
    AdminSurface::new(engine, Arc::new(scheduler))
}
