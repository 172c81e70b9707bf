use std::path::Path;
use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "housekeeper.toml";

/// Prefix for environment overrides, e.g. `HOUSEKEEPER__DATABASE__DSN`.
pub const ENV_PREFIX: &str = "HOUSEKEEPER__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL or SQLite DSN of the store being maintained
    pub dsn: String,
    /// Upper bound on pooled connections (in-memory SQLite always uses one)
    pub max_connections: u32,
    /// Per-statement timeout enforced by the driver
    #[serde(with = "humantime_serde")]
    pub statement_timeout: Duration,
    /// How long a routine waits for a pooled connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Use `VACUUM FULL` on PostgreSQL during the monthly reclaim pass
    #[serde(default)]
    pub full_vacuum: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/housekeeper.db"),
            max_connections: 5,
            statement_timeout: Duration::from_secs(15 * 60),
            acquire_timeout: Duration::from_secs(30),
            full_vacuum: false,
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration for tests and local runs
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
            ..Self::default()
        }
    }
}

/// A bearer token accepted by the admin surface
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminTokenConfig {
    pub token: String,
    pub name: String,
    /// Tokens without the admin capability authenticate but are rejected with 403
    #[serde(default)]
    pub admin: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Address the admin HTTP surface binds to
    pub bind_addr: String,
    #[serde(default)]
    pub tokens: Vec<AdminTokenConfig>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            bind_addr: String::from("0.0.0.0:3000"),
            tokens: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the background scheduler; the admin surface works either way
    pub enabled: bool,
    /// How often the scheduler checks for due jobs
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// IANA timezone the off-peak hours are expressed in
    pub timezone: String,
    /// Hour of day for the daily cleanup
    pub daily_hour: u32,
    /// Day of week for the weekly optimization
    pub weekly_day: Weekday,
    /// Hour of day for the weekly optimization
    pub weekly_hour: u32,
    /// Hour of day (on the 1st) for the monthly maintenance
    pub monthly_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(60),
            timezone: String::from("UTC"),
            daily_hour: 2,
            weekly_day: Weekday::Sun,
            weekly_hour: 3,
            monthly_hour: 4,
        }
    }
}

/// Disposition applied to rows that fall out of their retention window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Delete,
    Archive,
    Compress,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Delete => write!(f, "delete"),
            Strategy::Archive => write!(f, "archive"),
            Strategy::Compress => write!(f, "compress"),
        }
    }
}

/// Which scheduled routine additionally enforces a policy.
///
/// Every policy runs during the monthly sweep; daily and weekly policies
/// are also applied by the shorter cadences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sweep {
    Daily,
    Weekly,
    #[default]
    Monthly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub entity_type: String,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    pub strategy: Strategy,
    /// Extra SQL predicate rows must also satisfy, e.g. `is_read = 1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    /// JSON column rewritten by the compress strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress_column: Option<String>,
    #[serde(default)]
    pub sweep: Sweep,
}

fn default_timestamp_column() -> String {
    "created_at".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Count qualifying rows without touching them
    #[serde(default)]
    pub dry_run: bool,
    /// Rows removed or rewritten per statement for delete and compress
    pub batch_size: usize,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        const DAY: u64 = 24 * 3600;
        Self {
            dry_run: false,
            batch_size: 5_000,
            policies: vec![
                PolicyConfig {
                    entity_type: "audit_logs".to_string(),
                    retention: Duration::from_secs(90 * DAY),
                    strategy: Strategy::Delete,
                    selector: None,
                    timestamp_column: default_timestamp_column(),
                    compress_column: None,
                    sweep: Sweep::Daily,
                },
                PolicyConfig {
                    entity_type: "sessions".to_string(),
                    retention: Duration::from_secs(DAY),
                    strategy: Strategy::Delete,
                    selector: None,
                    timestamp_column: "expires_at".to_string(),
                    compress_column: None,
                    sweep: Sweep::Daily,
                },
                PolicyConfig {
                    entity_type: "notifications".to_string(),
                    retention: Duration::from_secs(30 * DAY),
                    strategy: Strategy::Delete,
                    selector: Some("is_read = 1".to_string()),
                    timestamp_column: default_timestamp_column(),
                    compress_column: None,
                    sweep: Sweep::Monthly,
                },
                PolicyConfig {
                    entity_type: "workflow_history".to_string(),
                    retention: Duration::from_secs(365 * DAY),
                    strategy: Strategy::Archive,
                    selector: None,
                    timestamp_column: default_timestamp_column(),
                    compress_column: None,
                    sweep: Sweep::Weekly,
                },
                PolicyConfig {
                    entity_type: "activity_logs".to_string(),
                    retention: Duration::from_secs(180 * DAY),
                    strategy: Strategy::Compress,
                    selector: None,
                    timestamp_column: default_timestamp_column(),
                    compress_column: Some("metadata".to_string()),
                    sweep: Sweep::Monthly,
                },
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Entity types whose footprint is collected every cycle
    pub watch_list: Vec<String>,
    /// Advisory row-count threshold
    pub record_threshold: u64,
    /// Advisory footprint threshold in bytes
    pub size_threshold_bytes: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            watch_list: [
                "audit_logs",
                "activity_logs",
                "notifications",
                "sessions",
                "workflow_history",
                "tasks",
                "documents",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            record_threshold: 50_000,
            size_threshold_bytes: 1024 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionGranularity {
    Weekly,
    Monthly,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Suffix appended to the partition name to form the index name
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub entity_type: String,
    pub granularity: PartitionGranularity,
    /// How far ahead of the current period partitions must exist
    #[serde(with = "humantime_serde")]
    pub horizon: Duration,
    /// Secondary indexes recreated on every new partition when the store
    /// does not inherit them from the parent
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

fn default_partitions() -> Vec<PartitionConfig> {
    vec![
        PartitionConfig {
            entity_type: "audit_logs".to_string(),
            granularity: PartitionGranularity::Monthly,
            horizon: Duration::from_secs(60 * 24 * 3600),
            indexes: vec![
                IndexConfig {
                    name: "user_idx".to_string(),
                    columns: vec!["user_id".to_string()],
                },
                IndexConfig {
                    name: "entity_idx".to_string(),
                    columns: vec!["entity_type".to_string(), "entity_id".to_string()],
                },
            ],
        },
        PartitionConfig {
            entity_type: "activity_logs".to_string(),
            granularity: PartitionGranularity::Weekly,
            horizon: Duration::from_secs(8 * 7 * 24 * 3600),
            indexes: vec![IndexConfig {
                name: "project_idx".to_string(),
                columns: vec!["project_id".to_string()],
            }],
        },
    ]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaterializedViewConfig {
    pub name: String,
    /// Defining query, used by stores without native materialized views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileCleanupConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding temporary upload artifacts
    pub temp_dir: String,
    /// Temporary files older than this are removed by the daily cleanup
    #[serde(with = "humantime_serde")]
    pub temp_max_age: Duration,
    /// Directory holding uploaded files referenced from the store
    pub upload_dir: String,
    /// Query returning the upload-relative paths still referenced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_query: Option<String>,
    /// Unreferenced files younger than this are kept
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    pub batch_size: usize,
    #[serde(default)]
    pub dry_run: bool,
    /// Query the references again before each removal batch
    #[serde(default = "default_revalidate_before_delete")]
    pub revalidate_before_delete: bool,
}

fn default_revalidate_before_delete() -> bool {
    true
}

impl Default for FileCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            temp_dir: ".data/tmp/uploads".to_string(),
            temp_max_age: Duration::from_secs(24 * 3600),
            upload_dir: ".data/uploads".to_string(),
            reference_query: None,
            grace_period: Duration::from_secs(24 * 3600),
            batch_size: 1000,
            dry_run: false,
            revalidate_before_delete: default_revalidate_before_delete(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(10 * 60),
            max_entries: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    pub database: DatabaseConfig,
    pub admin: AdminConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionConfig,
    pub metrics: MetricsConfig,
    #[serde(default = "default_partitions")]
    pub partitions: Vec<PartitionConfig>,
    #[serde(default)]
    pub materialized_views: Vec<MaterializedViewConfig>,
    pub files: FileCleanupConfig,
    pub cache: CacheConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            admin: AdminConfig::default(),
            scheduler: SchedulerConfig::default(),
            retention: RetentionConfig::default(),
            metrics: MetricsConfig::default(),
            partitions: default_partitions(),
            materialized_views: Vec::new(),
            files: FileCleanupConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Configuration {
    /// Load defaults, then `housekeeper.toml`, then `HOUSEKEEPER__*` env vars.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    /// Same layering as [`Configuration::load`] with an explicit file.
    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_configless_operation() {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .extract::<Configuration>()
            .unwrap();

        assert_eq!(config.database.dsn, "sqlite://.data/housekeeper.db");
        assert_eq!(config.retention.policies.len(), 5);
        assert_eq!(config.metrics.record_threshold, 50_000);
        assert_eq!(config.scheduler.weekly_day, Weekday::Sun);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_toml_overrides_policies() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "housekeeper.toml",
                r#"
                [retention]
                batch_size = 100

                [[retention.policies]]
                entity_type = "audit_logs"
                retention = "90days"
                strategy = "delete"
                sweep = "daily"

                [[retention.policies]]
                entity_type = "workflow_history"
                retention = "1year"
                strategy = "archive"
                "#,
            )?;

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.retention.batch_size, 100);
            assert_eq!(config.retention.policies.len(), 2);

            let audit = &config.retention.policies[0];
            assert_eq!(audit.strategy, Strategy::Delete);
            assert_eq!(audit.sweep, Sweep::Daily);
            assert_eq!(audit.retention, Duration::from_secs(90 * 24 * 3600));
            assert_eq!(audit.timestamp_column, "created_at");

            let history = &config.retention.policies[1];
            assert_eq!(history.strategy, Strategy::Archive);
            assert_eq!(history.sweep, Sweep::Monthly);
            Ok(())
        });
    }

    #[test]
    fn test_env_var_override() {
        Jail::expect_with(|jail| {
            jail.set_env("HOUSEKEEPER__DATABASE__DSN", "sqlite://./test.db");
            jail.set_env("HOUSEKEEPER__SCHEDULER__TICK_INTERVAL", "30s");
            jail.set_env("HOUSEKEEPER__METRICS__RECORD_THRESHOLD", "1000");

            let config = Configuration::load().map_err(|e| e.to_string())?;
            assert_eq!(config.database.dsn, "sqlite://./test.db");
            assert_eq!(config.scheduler.tick_interval, Duration::from_secs(30));
            assert_eq!(config.metrics.record_threshold, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_in_memory_database() {
        let db = DatabaseConfig::in_memory();
        assert_eq!(db.dsn, "sqlite::memory:");
        assert_eq!(db.max_connections, 5);
    }
}
