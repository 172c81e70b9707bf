use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row, query, query_scalar, raw_sql};

use super::{
    Dialect, PARTITION_REGISTRY_TABLE, PartitionRecord, PartitionSpec, RelationalStore,
    RowFilter, StoreError, format_timestamp, parse_timestamp, quote_ident,
};
use crate::config::DatabaseConfig;

/// sqlx-backed store for PostgreSQL and SQLite.
#[derive(Clone)]
pub enum SqlStore {
    Postgres { pool: PgPool, full_vacuum: bool },
    Sqlite(SqlitePool),
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore")
            .field("dialect", &self.dialect())
            .finish()
    }
}

impl SqlStore {
    /// Connect to the store and create the partition registry table.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let dsn = config.dsn.as_str();
        log::info!("Connecting to store database ({})", redact_dsn(dsn));

        let store = if dsn.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(dsn)?
                .create_if_missing(true)
                .busy_timeout(config.statement_timeout);

            // Every connection to an in-memory database sees its own data,
            // so the pool is pinned to a single long-lived connection.
            let in_memory = dsn.contains(":memory:");
            let pool_options = if in_memory {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                SqlitePoolOptions::new().max_connections(config.max_connections)
            };

            let pool = pool_options
                .acquire_timeout(config.acquire_timeout)
                .connect_with(options)
                .await
                .map_err(|e| {
                    log::error!("Failed to connect to SQLite database: {e}");
                    e
                })?;
            SqlStore::Sqlite(pool)
        } else {
            let statement_timeout_ms = config.statement_timeout.as_millis().to_string();
            let options = PgConnectOptions::from_str(dsn)?
                .options([("statement_timeout", statement_timeout_ms.as_str())]);

            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(config.acquire_timeout)
                .connect_with(options)
                .await
                .map_err(|e| {
                    log::error!("Failed to connect to PostgreSQL database: {e}");
                    e
                })?;
            SqlStore::Postgres {
                pool,
                full_vacuum: config.full_vacuum,
            }
        };

        log::info!("Store connection established ({})", store.dialect());
        store.init().await.map_err(|e| {
            log::error!("Failed to initialize partition registry: {e}");
            e
        })?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        match self {
            SqlStore::Sqlite(pool) => {
                let create_registry = format!(
                    r#"
                CREATE TABLE IF NOT EXISTS {PARTITION_REGISTRY_TABLE} (
                    parent TEXT NOT NULL,
                    label TEXT NOT NULL,
                    name TEXT NOT NULL,
                    range_start TEXT NOT NULL,
                    range_end TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (parent, label)
                )"#
                );
                raw_sql(&create_registry).execute(pool).await?;
            }
            SqlStore::Postgres { pool, .. } => {
                let create_registry = format!(
                    r#"
                CREATE TABLE IF NOT EXISTS {PARTITION_REGISTRY_TABLE} (
                    parent TEXT NOT NULL,
                    label TEXT NOT NULL,
                    name TEXT NOT NULL,
                    range_start TIMESTAMPTZ NOT NULL,
                    range_end TIMESTAMPTZ NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (parent, label)
                )"#
                );
                raw_sql(&create_registry).execute(pool).await?;
            }
        }
        Ok(())
    }
}

/// Matches the summary written by `compress_expired`, which always leads
/// with the `compressed` key, without casting the column to JSON.
const COMPRESSED_SUMMARY_PATTERN: &str = r#"^\s*\{\s*"compressed"\s*:\s*true"#;

/// `"ts" < cutoff AND (selector)`, binding the cutoff as the first parameter.
///
/// SQLite stores timestamps as text in more than one layout, so both sides
/// are compared as Julian day numbers rather than as strings.
fn expired_predicate(filter: &RowFilter, dialect: Dialect) -> Result<String, StoreError> {
    let column = quote_ident(&filter.timestamp_column)?;
    let mut predicate = match dialect {
        Dialect::Postgres => format!("{column} < $1"),
        Dialect::Sqlite => format!("julianday({column}) < julianday(?)"),
    };
    if let Some(selector) = &filter.selector {
        predicate.push_str(&format!(" AND ({selector})"));
    }
    Ok(predicate)
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn limit(batch_size: usize) -> i64 {
    i64::try_from(batch_size).unwrap_or(i64::MAX)
}

/// Strip credentials before a DSN reaches the logs.
fn redact_dsn(dsn: &str) -> String {
    match (dsn.find("://"), dsn.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &dsn[..scheme_end], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}

#[async_trait]
impl RelationalStore for SqlStore {
    fn dialect(&self) -> Dialect {
        match self {
            SqlStore::Postgres { .. } => Dialect::Postgres,
            SqlStore::Sqlite(_) => Dialect::Sqlite,
        }
    }

    fn propagates_partition_indexes(&self) -> bool {
        matches!(self, SqlStore::Postgres { .. })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match self {
            SqlStore::Postgres { pool, .. } => {
                query("SELECT 1").execute(pool).await?;
            }
            SqlStore::Sqlite(pool) => {
                query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<u64, StoreError> {
        let affected = match self {
            SqlStore::Postgres { pool, .. } => raw_sql(sql).execute(pool).await?.rows_affected(),
            SqlStore::Sqlite(pool) => raw_sql(sql).execute(pool).await?.rows_affected(),
        };
        Ok(affected)
    }

    async fn query_strings(&self, sql: &str) -> Result<Vec<String>, StoreError> {
        let values = match self {
            SqlStore::Postgres { pool, .. } => query(sql)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<Vec<_>, _>>()?,
            SqlStore::Sqlite(pool) => query(sql)
                .fetch_all(pool)
                .await?
                .iter()
                .map(|row| row.try_get::<String, _>(0))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(values)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
        let count: i64 = match self {
            SqlStore::Postgres { pool, .. } => query_scalar(&sql).fetch_one(pool).await?,
            SqlStore::Sqlite(pool) => query_scalar(&sql).fetch_one(pool).await?,
        };
        Ok(to_u64(count))
    }

    async fn table_size_bytes(&self, table: &str) -> Result<Option<u64>, StoreError> {
        let quoted = quote_ident(table)?;
        match self {
            SqlStore::Postgres { pool, .. } => {
                // Partitioned parents hold no data themselves, so their
                // direct children are summed in.
                let size: i64 = query_scalar(
                    r#"
                    SELECT COALESCE(SUM(pg_total_relation_size(c.oid)), 0)::BIGINT
                    FROM pg_class c
                    WHERE c.oid = to_regclass($1)
                       OR c.oid IN (SELECT inhrelid FROM pg_inherits WHERE inhparent = to_regclass($1))
                    "#,
                )
                .bind(&quoted)
                .fetch_one(pool)
                .await?;
                Ok(Some(to_u64(size)))
            }
            SqlStore::Sqlite(pool) => {
                let dbstat: Result<i64, sqlx::Error> =
                    query_scalar("SELECT COALESCE(SUM(pgsize), 0) FROM dbstat WHERE name = ?")
                        .bind(table)
                        .fetch_one(pool)
                        .await;
                match dbstat {
                    Ok(size) => Ok(Some(to_u64(size))),
                    Err(e) => {
                        log::warn!("dbstat unavailable ({e}), size of {table} is unknown");
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn count_expired(&self, filter: &RowFilter) -> Result<u64, StoreError> {
        let table = quote_ident(&filter.table)?;
        let count: i64 = match self {
            SqlStore::Postgres { pool, .. } => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {table} WHERE {}",
                    expired_predicate(filter, Dialect::Postgres)?
                );
                query_scalar(&sql).bind(filter.cutoff).fetch_one(pool).await?
            }
            SqlStore::Sqlite(pool) => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {table} WHERE {}",
                    expired_predicate(filter, Dialect::Sqlite)?
                );
                query_scalar(&sql)
                    .bind(format_timestamp(filter.cutoff))
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(to_u64(count))
    }

    async fn delete_expired(
        &self,
        filter: &RowFilter,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        let table = quote_ident(&filter.table)?;
        let affected = match self {
            SqlStore::Postgres { pool, .. } => {
                // ctid alone is not unique across partitions
                let sql = format!(
                    "DELETE FROM {table} WHERE (tableoid, ctid) IN \
                     (SELECT tableoid, ctid FROM {table} WHERE {} LIMIT $2)",
                    expired_predicate(filter, Dialect::Postgres)?
                );
                query(&sql)
                    .bind(filter.cutoff)
                    .bind(limit(batch_size))
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            SqlStore::Sqlite(pool) => {
                let sql = format!(
                    "DELETE FROM {table} WHERE rowid IN \
                     (SELECT rowid FROM {table} WHERE {} LIMIT ?)",
                    expired_predicate(filter, Dialect::Sqlite)?
                );
                query(&sql)
                    .bind(format_timestamp(filter.cutoff))
                    .bind(limit(batch_size))
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        Ok(affected)
    }

    async fn archive_expired(
        &self,
        filter: &RowFilter,
        archive_table: &str,
    ) -> Result<u64, StoreError> {
        let table = quote_ident(&filter.table)?;
        let archive = quote_ident(archive_table)?;

        let (copied, removed) = match self {
            SqlStore::Postgres { pool, .. } => {
                let predicate = expired_predicate(filter, Dialect::Postgres)?;
                let create_archive =
                    format!("CREATE TABLE IF NOT EXISTS {archive} (LIKE {table} INCLUDING DEFAULTS)");
                let copy = format!("INSERT INTO {archive} SELECT * FROM {table} WHERE {predicate}");
                let delete = format!("DELETE FROM {table} WHERE {predicate}");

                let mut tx = pool.begin().await?;
                // Both statements must see the same snapshot of qualifying rows.
                (&mut *tx)
                    .execute("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                    .await?;
                (&mut *tx).execute(create_archive.as_str()).await?;

                let copied = (&mut *tx)
                    .execute(query(&copy).bind(filter.cutoff))
                    .await?
                    .rows_affected();
                let removed = (&mut *tx)
                    .execute(query(&delete).bind(filter.cutoff))
                    .await?
                    .rows_affected();

                if copied != removed {
                    tx.rollback().await?;
                } else {
                    tx.commit().await?;
                }
                (copied, removed)
            }
            SqlStore::Sqlite(pool) => {
                let predicate = expired_predicate(filter, Dialect::Sqlite)?;
                let cutoff = format_timestamp(filter.cutoff);
                let create_archive =
                    format!("CREATE TABLE IF NOT EXISTS {archive} AS SELECT * FROM {table} WHERE 0");
                let copy = format!("INSERT INTO {archive} SELECT * FROM {table} WHERE {predicate}");
                let delete = format!("DELETE FROM {table} WHERE {predicate}");

                let mut tx = pool.begin().await?;
                (&mut *tx).execute(create_archive.as_str()).await?;

                let copied = (&mut *tx)
                    .execute(query(&copy).bind(&cutoff))
                    .await?
                    .rows_affected();
                let removed = (&mut *tx)
                    .execute(query(&delete).bind(&cutoff))
                    .await?
                    .rows_affected();

                if copied != removed {
                    tx.rollback().await?;
                } else {
                    tx.commit().await?;
                }
                (copied, removed)
            }
        };

        if copied != removed {
            return Err(StoreError::ArchiveMismatch {
                table: filter.table.clone(),
                copied,
                removed,
            });
        }
        Ok(removed)
    }

    async fn compress_expired(
        &self,
        filter: &RowFilter,
        column: &str,
        compressed_at: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<u64, StoreError> {
        let table = quote_ident(&filter.table)?;
        let col = quote_ident(column)?;

        let affected = match self {
            SqlStore::Postgres { pool, .. } => {
                let sql = format!(
                    "UPDATE {table} SET {col} = json_build_object(\
                        'compressed', true, \
                        'originalSize', octet_length({col}::text), \
                        'compressedAt', $2::text) \
                     WHERE (tableoid, ctid) IN (\
                        SELECT tableoid, ctid FROM {table} \
                        WHERE {} AND {col} IS NOT NULL \
                          AND {col}::text !~ $4 \
                        LIMIT $3)",
                    expired_predicate(filter, Dialect::Postgres)?
                );
                query(&sql)
                    .bind(filter.cutoff)
                    .bind(format_timestamp(compressed_at))
                    .bind(limit(batch_size))
                    .bind(COMPRESSED_SUMMARY_PATTERN)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            SqlStore::Sqlite(pool) => {
                let sql = format!(
                    "UPDATE {table} SET {col} = json_object(\
                        'compressed', json('true'), \
                        'originalSize', length(CAST({col} AS BLOB)), \
                        'compressedAt', ?) \
                     WHERE rowid IN (\
                        SELECT rowid FROM {table} \
                        WHERE {} AND {col} IS NOT NULL \
                          AND (CASE WHEN json_valid({col}) THEN json_extract({col}, '$.compressed') END) IS NOT 1 \
                        LIMIT ?)",
                    expired_predicate(filter, Dialect::Sqlite)?
                );
                query(&sql)
                    .bind(format_timestamp(compressed_at))
                    .bind(format_timestamp(filter.cutoff))
                    .bind(limit(batch_size))
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        Ok(affected)
    }

    async fn create_partition(&self, spec: &PartitionSpec) -> Result<bool, StoreError> {
        let parent = quote_ident(&spec.parent)?;
        let name = quote_ident(&spec.name)?;

        match self {
            SqlStore::Postgres { pool, .. } => {
                let select = format!(
                    "SELECT range_start, range_end FROM {PARTITION_REGISTRY_TABLE} \
                     WHERE parent = $1 AND label = $2"
                );
                let create = format!(
                    "CREATE TABLE IF NOT EXISTS {name} PARTITION OF {parent} \
                     FOR VALUES FROM ('{}') TO ('{}')",
                    format_timestamp(spec.range_start),
                    format_timestamp(spec.range_end)
                );
                let register = format!(
                    "INSERT INTO {PARTITION_REGISTRY_TABLE} \
                     (parent, label, name, range_start, range_end) VALUES ($1, $2, $3, $4, $5)"
                );

                let mut tx = pool.begin().await?;
                let existing = (&mut *tx)
                    .fetch_optional(query(&select).bind(&spec.parent).bind(&spec.label))
                    .await?;

                if let Some(row) = existing {
                    let existing_start: DateTime<Utc> = row.try_get("range_start")?;
                    let existing_end: DateTime<Utc> = row.try_get("range_end")?;
                    tx.rollback().await?;
                    return check_existing(spec, existing_start, existing_end);
                }

                (&mut *tx).execute(create.as_str()).await?;
                (&mut *tx)
                    .execute(
                        query(&register)
                            .bind(&spec.parent)
                            .bind(&spec.label)
                            .bind(&spec.name)
                            .bind(spec.range_start)
                            .bind(spec.range_end),
                    )
                    .await?;

                tx.commit().await?;
            }
            SqlStore::Sqlite(pool) => {
                let select = format!(
                    "SELECT range_start, range_end FROM {PARTITION_REGISTRY_TABLE} \
                     WHERE parent = ? AND label = ?"
                );
                let create = format!("CREATE TABLE IF NOT EXISTS {name} AS SELECT * FROM {parent} WHERE 0");
                let register = format!(
                    "INSERT INTO {PARTITION_REGISTRY_TABLE} \
                     (parent, label, name, range_start, range_end, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)"
                );

                let mut tx = pool.begin().await?;
                let existing = (&mut *tx)
                    .fetch_optional(query(&select).bind(&spec.parent).bind(&spec.label))
                    .await?;

                if let Some(row) = existing {
                    let existing_start: String = row.try_get("range_start")?;
                    let existing_end: String = row.try_get("range_end")?;
                    tx.rollback().await?;
                    return check_existing(
                        spec,
                        parse_timestamp(&existing_start, PARTITION_REGISTRY_TABLE)?,
                        parse_timestamp(&existing_end, PARTITION_REGISTRY_TABLE)?,
                    );
                }

                (&mut *tx).execute(create.as_str()).await?;
                (&mut *tx)
                    .execute(
                        query(&register)
                            .bind(&spec.parent)
                            .bind(&spec.label)
                            .bind(&spec.name)
                            .bind(format_timestamp(spec.range_start))
                            .bind(format_timestamp(spec.range_end))
                            .bind(format_timestamp(Utc::now())),
                    )
                    .await?;

                tx.commit().await?;
            }
        }

        log::info!(
            "Created partition {} of {} for {} .. {}",
            spec.name,
            spec.parent,
            spec.range_start,
            spec.range_end
        );
        Ok(true)
    }

    async fn list_partitions(&self, parent: &str) -> Result<Vec<PartitionRecord>, StoreError> {
        match self {
            SqlStore::Postgres { pool, .. } => {
                let rows = query(&format!(
                    "SELECT parent, name, label, range_start, range_end, created_at \
                     FROM {PARTITION_REGISTRY_TABLE} WHERE parent = $1 ORDER BY range_start"
                ))
                .bind(parent)
                .fetch_all(pool)
                .await?;

                let mut partitions = Vec::with_capacity(rows.len());
                for row in rows {
                    partitions.push(PartitionRecord {
                        parent: row.try_get("parent")?,
                        name: row.try_get("name")?,
                        label: row.try_get("label")?,
                        range_start: row.try_get("range_start")?,
                        range_end: row.try_get("range_end")?,
                        created_at: row.try_get("created_at")?,
                    });
                }
                Ok(partitions)
            }
            SqlStore::Sqlite(pool) => {
                let rows = query(&format!(
                    "SELECT parent, name, label, range_start, range_end, created_at \
                     FROM {PARTITION_REGISTRY_TABLE} WHERE parent = ? ORDER BY range_start"
                ))
                .bind(parent)
                .fetch_all(pool)
                .await?;

                let mut partitions = Vec::with_capacity(rows.len());
                for row in rows {
                    let range_start: String = row.try_get("range_start")?;
                    let range_end: String = row.try_get("range_end")?;
                    let created_at: String = row.try_get("created_at")?;
                    partitions.push(PartitionRecord {
                        parent: row.try_get("parent")?,
                        name: row.try_get("name")?,
                        label: row.try_get("label")?,
                        range_start: parse_timestamp(&range_start, PARTITION_REGISTRY_TABLE)?,
                        range_end: parse_timestamp(&range_end, PARTITION_REGISTRY_TABLE)?,
                        created_at: parse_timestamp(&created_at, PARTITION_REGISTRY_TABLE)?,
                    });
                }
                Ok(partitions)
            }
        }
    }

    async fn create_index(
        &self,
        table: &str,
        index: &str,
        columns: &[String],
    ) -> Result<(), StoreError> {
        let columns = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({columns})",
            quote_ident(index)?,
            quote_ident(table)?
        );
        self.execute(&sql).await?;
        Ok(())
    }

    async fn refresh_statistics(&self, table: &str) -> Result<(), StoreError> {
        self.execute(&format!("ANALYZE {}", quote_ident(table)?))
            .await?;
        Ok(())
    }

    async fn rebuild_indexes(&self, table: &str) -> Result<(), StoreError> {
        let table = quote_ident(table)?;
        let sql = match self {
            SqlStore::Postgres { .. } => format!("REINDEX TABLE {table}"),
            SqlStore::Sqlite(_) => format!("REINDEX {table}"),
        };
        self.execute(&sql).await?;
        Ok(())
    }

    async fn refresh_materialized_view(
        &self,
        name: &str,
        view_query: Option<&str>,
    ) -> Result<(), StoreError> {
        let view = quote_ident(name)?;
        match self {
            SqlStore::Postgres { pool, .. } => {
                // CONCURRENTLY keeps readers unblocked; it relies on a unique
                // index on the view.
                raw_sql(&format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {view}"))
                    .execute(pool)
                    .await?;
            }
            SqlStore::Sqlite(pool) => {
                let view_query = view_query.ok_or_else(|| {
                    StoreError::Database(sqlx::Error::Configuration(
                        format!("materialized view {name} has no defining query").into(),
                    ))
                })?;
                let drop = format!("DROP TABLE IF EXISTS {view}");
                let rebuild = format!("CREATE TABLE {view} AS {view_query}");

                let mut tx = pool.begin().await?;
                (&mut *tx).execute(drop.as_str()).await?;
                (&mut *tx).execute(rebuild.as_str()).await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }

    async fn reclaim_space(&self) -> Result<(), StoreError> {
        match self {
            SqlStore::Postgres { pool, full_vacuum } => {
                let sql = if *full_vacuum {
                    "VACUUM (FULL, ANALYZE)"
                } else {
                    "VACUUM (ANALYZE)"
                };
                raw_sql(sql).execute(pool).await?;
            }
            SqlStore::Sqlite(pool) => {
                raw_sql("VACUUM").execute(pool).await?;
            }
        }
        Ok(())
    }
}

fn check_existing(
    spec: &PartitionSpec,
    existing_start: DateTime<Utc>,
    existing_end: DateTime<Utc>,
) -> Result<bool, StoreError> {
    if existing_start == spec.range_start && existing_end == spec.range_end {
        Ok(false)
    } else {
        Err(StoreError::PartitionConflict {
            parent: spec.parent.clone(),
            label: spec.label.clone(),
            existing_start,
            existing_end,
        })
    }
}
