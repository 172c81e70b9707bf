//! Relational store abstraction used by the maintenance engine.
//!
//! The engine never owns the schema of the business tables it maintains;
//! it only issues the maintenance statements defined by
//! [`RelationalStore`]. [`SqlStore`] implements them for PostgreSQL and
//! SQLite. On SQLite, timestamps are RFC 3339 UTC text, partitions are
//! emulated as sibling tables and materialized views as rebuilt tables.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

mod sql;

pub use sql::SqlStore;

/// Name of the registry table tracking every partition created.
pub const PARTITION_REGISTRY_TABLE: &str = "maintenance_partitions";

/// Rows of a table older than a cutoff, optionally narrowed by a predicate.
#[derive(Debug, Clone)]
pub struct RowFilter {
    pub table: String,
    pub timestamp_column: String,
    pub cutoff: DateTime<Utc>,
    pub selector: Option<String>,
}

/// A time slice to be created as a partition of `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub parent: String,
    pub name: String,
    pub label: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
}

/// A partition as recorded in the registry table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub parent: String,
    pub name: String,
    pub label: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PartitionRecord {
    pub fn same_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.range_start == start && self.range_end == end
    }

    /// Half-open ranges `[start, end)` overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.range_start < end && start < self.range_end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
            Dialect::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error(
        "Partition {label} of {parent} already exists with range {existing_start} .. {existing_end}"
    )]
    PartitionConflict {
        parent: String,
        label: String,
        existing_start: DateTime<Utc>,
        existing_end: DateTime<Utc>,
    },

    #[error("Archive of {table} copied {copied} rows but removed {removed}; rolled back")]
    ArchiveMismatch {
        table: String,
        copied: u64,
        removed: u64,
    },

    #[error("Invalid timestamp '{value}' in {context}")]
    InvalidTimestamp { value: String, context: String },
}

/// Operations the maintenance engine needs from the relational store.
///
/// Batched operations process at most `batch_size` rows per call and
/// return how many rows they touched; callers loop until a short batch.
#[async_trait]
pub trait RelationalStore: Send + Sync + std::fmt::Debug {
    fn dialect(&self) -> Dialect;

    /// Whether indexes declared on a partitioned parent reach new partitions
    fn propagates_partition_indexes(&self) -> bool;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Run an ad hoc statement, returning affected rows.
    async fn execute(&self, sql: &str) -> Result<u64, StoreError>;

    /// Run a query and return its first column as text.
    async fn query_strings(&self, sql: &str) -> Result<Vec<String>, StoreError>;

    async fn count_rows(&self, table: &str) -> Result<u64, StoreError>;

    /// On-disk footprint of `table`, or `None` when the store cannot
    /// attribute space to a single table.
    async fn table_size_bytes(&self, table: &str) -> Result<Option<u64>, StoreError>;

    async fn count_expired(&self, filter: &RowFilter) -> Result<u64, StoreError>;

    async fn delete_expired(&self, filter: &RowFilter, batch_size: usize)
    -> Result<u64, StoreError>;

    /// Copy expired rows into `archive_table` and then remove them from the
    /// live table, atomically.
    async fn archive_expired(
        &self,
        filter: &RowFilter,
        archive_table: &str,
    ) -> Result<u64, StoreError>;

    /// Replace `column` of expired, not yet compressed rows with a summary.
    async fn compress_expired(
        &self,
        filter: &RowFilter,
        column: &str,
        compressed_at: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError>;

    /// Create a partition; `Ok(false)` if the identical one already exists.
    async fn create_partition(&self, spec: &PartitionSpec) -> Result<bool, StoreError>;

    async fn list_partitions(&self, parent: &str) -> Result<Vec<PartitionRecord>, StoreError>;

    async fn create_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
    ) -> Result<(), StoreError>;

    async fn refresh_statistics(&self, table: &str) -> Result<(), StoreError>;

    async fn rebuild_indexes(&self, table: &str) -> Result<(), StoreError>;

    async fn refresh_materialized_view(
        &self,
        name: &str,
        query: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn reclaim_space(&self) -> Result<(), StoreError>;
}

/// Validate an identifier and wrap it in double quotes.
pub fn quote_ident(name: &str) -> Result<String, StoreError> {
    if is_valid_identifier(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes (the PostgreSQL limit).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Name of the shadow table receiving archived rows.
pub fn archive_table_name(entity: &str) -> String {
    format!("{entity}_Archive")
}

/// Canonical text form of timestamps stored as text.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str, context: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            value: value.to_string(),
            context: context.to_string(),
        })
}
