//! In-process [`RelationalStore`] for engine tests.
//!
//! Tables are vectors of [`FakeRow`]; selectors are ignored. Failures,
//! latency and per-table concurrency can be injected and observed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::store::{
    Dialect, PartitionRecord, PartitionSpec, RelationalStore, RowFilter, StoreError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRow {
    pub timestamp: DateTime<Utc>,
    pub payload: Option<String>,
    pub compressed: bool,
}

impl FakeRow {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            payload: Some(format!("{{\"at\":\"{timestamp}\"}}")),
            compressed: false,
        }
    }

    fn size_bytes(&self) -> u64 {
        64 + self.payload.as_ref().map_or(0, |p| p.len() as u64)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    tables: HashMap<String, Vec<FakeRow>>,
    partitions: Vec<PartitionRecord>,
    indexes: Vec<(String, String, Vec<String>)>,
    statements: Vec<String>,
    query_results: HashMap<String, Vec<String>>,
    failing: HashMap<String, String>,
    fail_after_batches: HashMap<String, usize>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
pub struct FakeStore {
    state: Arc<Mutex<FakeState>>,
    delay: Option<Duration>,
    propagates_indexes: bool,
    reports_sizes: bool,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight {
    state: Arc<Mutex<FakeState>>,
    table: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(count) = state.in_flight.get_mut(&self.table) {
            *count = count.saturating_sub(1);
        }
    }
}

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn injected(message: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(message.to_string()))
}

fn missing_table(table: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!("no such table: {table}")))
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            delay: None,
            propagates_indexes: false,
            reports_sizes: true,
        }
    }

    /// Sleep inside every mutating call so overlapping calls are observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_index_propagation(mut self) -> Self {
        self.propagates_indexes = true;
        self
    }

    /// Behave like a store that cannot size individual tables.
    pub fn without_table_sizes(mut self) -> Self {
        self.reports_sizes = false;
        self
    }

    pub fn add_table(&self, table: &str) {
        lock(&self.state).tables.entry(table.to_string()).or_default();
    }

    pub fn insert_rows(&self, table: &str, timestamps: impl IntoIterator<Item = DateTime<Utc>>) {
        let mut state = lock(&self.state);
        let rows = state.tables.entry(table.to_string()).or_default();
        rows.extend(timestamps.into_iter().map(FakeRow::at));
    }

    pub fn rows(&self, table: &str) -> Vec<FakeRow> {
        lock(&self.state)
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.state).tables.get(table).map_or(0, Vec::len)
    }

    pub fn has_table(&self, table: &str) -> bool {
        lock(&self.state).tables.contains_key(table)
    }

    /// Every operation touching `table` fails with `message`.
    pub fn fail_table(&self, table: &str, message: &str) {
        lock(&self.state)
            .failing
            .insert(table.to_string(), message.to_string());
    }

    /// Batched operations on `table` succeed `batches` times, then fail.
    pub fn fail_after_batches(&self, table: &str, batches: usize) {
        lock(&self.state)
            .fail_after_batches
            .insert(table.to_string(), batches);
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.failing.clear();
        state.fail_after_batches.clear();
    }

    pub fn set_query_result(&self, sql: &str, values: Vec<String>) {
        lock(&self.state)
            .query_results
            .insert(sql.to_string(), values);
    }

    /// Maintenance statements issued so far, e.g. `ANALYZE audit_logs`.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state).statements.clone()
    }

    pub fn indexes(&self) -> Vec<(String, String, Vec<String>)> {
        lock(&self.state).indexes.clone()
    }

    /// Highest number of overlapping mutating calls seen on `table`.
    pub fn max_concurrency(&self, table: &str) -> usize {
        lock(&self.state)
            .max_in_flight
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    fn check(&self, table: &str) -> Result<(), StoreError> {
        let state = lock(&self.state);
        if let Some(message) = state.failing.get(table) {
            return Err(injected(message));
        }
        if !state.tables.contains_key(table) {
            return Err(missing_table(table));
        }
        Ok(())
    }

    fn consume_batch(&self, table: &str) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        if let Some(remaining) = state.fail_after_batches.get_mut(table) {
            if *remaining == 0 {
                return Err(injected(&format!("injected failure on {table}")));
            }
            *remaining -= 1;
        }
        Ok(())
    }

    async fn enter(&self, table: &str) -> InFlight {
        {
            let mut state = lock(&self.state);
            let count = state.in_flight.entry(table.to_string()).or_insert(0);
            *count += 1;
            let current = *count;
            let max = state.max_in_flight.entry(table.to_string()).or_insert(0);
            *max = (*max).max(current);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        InFlight {
            state: self.state.clone(),
            table: table.to_string(),
        }
    }

    fn record(&self, statement: String) {
        lock(&self.state).statements.push(statement);
    }
}

#[async_trait]
impl RelationalStore for FakeStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn propagates_partition_indexes(&self) -> bool {
        self.propagates_indexes
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        self.record(sql.to_string());
        Ok(0)
    }

    async fn query_strings(&self, sql: &str) -> Result<Vec<String>, StoreError> {
        lock(&self.state)
            .query_results
            .get(sql)
            .cloned()
            .ok_or_else(|| injected(&format!("no result configured for {sql}")))
    }

    async fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        self.check(table)?;
        Ok(self.row_count(table) as u64)
    }

    async fn table_size_bytes(&self, table: &str) -> Result<Option<u64>, StoreError> {
        self.check(table)?;
        if !self.reports_sizes {
            return Ok(None);
        }
        Ok(Some(self.rows(table).iter().map(FakeRow::size_bytes).sum()))
    }

    async fn count_expired(&self, filter: &RowFilter) -> Result<u64, StoreError> {
        self.check(&filter.table)?;
        Ok(self
            .rows(&filter.table)
            .iter()
            .filter(|row| row.timestamp < filter.cutoff)
            .count() as u64)
    }

    async fn delete_expired(
        &self,
        filter: &RowFilter,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        self.check(&filter.table)?;
        let _guard = self.enter(&filter.table).await;
        self.consume_batch(&filter.table)?;

        let mut state = lock(&self.state);
        let rows = state
            .tables
            .get_mut(&filter.table)
            .ok_or_else(|| missing_table(&filter.table))?;
        let mut removed = 0usize;
        rows.retain(|row| {
            if removed < batch_size && row.timestamp < filter.cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed as u64)
    }

    async fn archive_expired(
        &self,
        filter: &RowFilter,
        archive_table: &str,
    ) -> Result<u64, StoreError> {
        self.check(&filter.table)?;
        let _guard = self.enter(&filter.table).await;
        self.consume_batch(&filter.table)?;

        let mut state = lock(&self.state);
        let rows = state
            .tables
            .get_mut(&filter.table)
            .ok_or_else(|| missing_table(&filter.table))?;
        let (expired, kept): (Vec<FakeRow>, Vec<FakeRow>) = rows
            .drain(..)
            .partition(|row| row.timestamp < filter.cutoff);
        *rows = kept;
        let moved = expired.len() as u64;
        state
            .tables
            .entry(archive_table.to_string())
            .or_default()
            .extend(expired);
        Ok(moved)
    }

    async fn compress_expired(
        &self,
        filter: &RowFilter,
        _column: &str,
        compressed_at: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        self.check(&filter.table)?;
        let _guard = self.enter(&filter.table).await;
        self.consume_batch(&filter.table)?;

        let mut state = lock(&self.state);
        let rows = state
            .tables
            .get_mut(&filter.table)
            .ok_or_else(|| missing_table(&filter.table))?;
        let mut rewritten = 0usize;
        for row in rows.iter_mut() {
            if rewritten == batch_size {
                break;
            }
            if row.timestamp < filter.cutoff && !row.compressed {
                if let Some(payload) = &row.payload {
                    row.payload = Some(format!(
                        "{{\"compressed\":true,\"originalSize\":{},\"compressedAt\":\"{}\"}}",
                        payload.len(),
                        compressed_at.to_rfc3339()
                    ));
                    row.compressed = true;
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten as u64)
    }

    async fn create_partition(&self, spec: &PartitionSpec) -> Result<bool, StoreError> {
        self.check(&spec.parent)?;
        let _guard = self.enter(&spec.parent).await;

        let mut state = lock(&self.state);
        if let Some(existing) = state
            .partitions
            .iter()
            .find(|p| p.parent == spec.parent && p.label == spec.label)
        {
            if existing.same_range(spec.range_start, spec.range_end) {
                return Ok(false);
            }
            return Err(StoreError::PartitionConflict {
                parent: spec.parent.clone(),
                label: spec.label.clone(),
                existing_start: existing.range_start,
                existing_end: existing.range_end,
            });
        }

        state.partitions.push(PartitionRecord {
            parent: spec.parent.clone(),
            name: spec.name.clone(),
            label: spec.label.clone(),
            range_start: spec.range_start,
            range_end: spec.range_end,
            created_at: Utc::now(),
        });
        state.tables.entry(spec.name.clone()).or_default();
        Ok(true)
    }

    async fn list_partitions(&self, parent: &str) -> Result<Vec<PartitionRecord>, StoreError> {
        let mut partitions: Vec<PartitionRecord> = lock(&self.state)
            .partitions
            .iter()
            .filter(|p| p.parent == parent)
            .cloned()
            .collect();
        partitions.sort_by_key(|p| p.range_start);
        Ok(partitions)
    }

    async fn create_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
    ) -> Result<(), StoreError> {
        self.check(table)?;
        let mut state = lock(&self.state);
        if !state.indexes.iter().any(|(_, name, _)| name == index) {
            state
                .indexes
                .push((table.to_string(), index.to_string(), columns.to_vec()));
        }
        Ok(())
    }

    async fn refresh_statistics(&self, table: &str) -> Result<(), StoreError> {
        self.check(table)?;
        self.record(format!("ANALYZE {table}"));
        Ok(())
    }

    async fn rebuild_indexes(&self, table: &str) -> Result<(), StoreError> {
        self.check(table)?;
        self.record(format!("REINDEX {table}"));
        Ok(())
    }

    async fn refresh_materialized_view(
        &self,
        name: &str,
        _query: Option<&str>,
    ) -> Result<(), StoreError> {
        if let Some(message) = lock(&self.state).failing.get(name) {
            return Err(injected(message));
        }
        self.record(format!("REFRESH {name}"));
        Ok(())
    }

    async fn reclaim_space(&self) -> Result<(), StoreError> {
        self.record("VACUUM".to_string());
        Ok(())
    }
}
