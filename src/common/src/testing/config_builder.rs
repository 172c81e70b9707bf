//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::{
    AdminTokenConfig, Configuration, DatabaseConfig, PartitionConfig, PartitionGranularity,
    PolicyConfig, Strategy, Sweep,
};

/// Builder for creating test configurations.
///
/// Starts from [`Configuration::default`] with the scheduler disabled so
/// tests drive jobs explicitly.
///
/// ```rust,ignore
/// let config = TestConfigBuilder::new()
///     .in_memory()
///     .with_policy("audit_logs", Duration::from_secs(90 * 86_400), Strategy::Delete)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.scheduler.enabled = false;
        config.admin.bind_addr = "127.0.0.1:0".to_string();
        Self { config }
    }

    /// Use an in-memory SQLite database.
    pub fn in_memory(mut self) -> Self {
        self.config.database = DatabaseConfig::in_memory();
        self
    }

    pub fn with_database_dsn(mut self, dsn: &str) -> Self {
        self.config.database.dsn = dsn.to_string();
        self
    }

    /// Drop every default retention policy, partition and watched entity.
    pub fn without_defaults(mut self) -> Self {
        self.config.retention.policies.clear();
        self.config.partitions.clear();
        self.config.metrics.watch_list.clear();
        self
    }

    /// Add a retention policy that runs on the monthly sweep.
    pub fn with_policy(self, entity_type: &str, retention: Duration, strategy: Strategy) -> Self {
        self.with_policy_config(PolicyConfig {
            entity_type: entity_type.to_string(),
            retention,
            strategy,
            selector: None,
            timestamp_column: "created_at".to_string(),
            compress_column: (strategy == Strategy::Compress).then(|| "metadata".to_string()),
            sweep: Sweep::Monthly,
        })
    }

    pub fn with_policy_config(mut self, policy: PolicyConfig) -> Self {
        self.config
            .retention
            .policies
            .retain(|p| p.entity_type != policy.entity_type);
        self.config.retention.policies.push(policy);
        self
    }

    pub fn with_partition(
        mut self,
        entity_type: &str,
        granularity: PartitionGranularity,
        horizon: Duration,
    ) -> Self {
        self.config.partitions.push(PartitionConfig {
            entity_type: entity_type.to_string(),
            granularity,
            horizon,
            indexes: Vec::new(),
        });
        self
    }

    pub fn with_watched_entity(mut self, entity_type: &str) -> Self {
        self.config.metrics.watch_list.push(entity_type.to_string());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.retention.batch_size = batch_size;
        self
    }

    pub fn with_dry_run(mut self) -> Self {
        self.config.retention.dry_run = true;
        self
    }

    /// Register a token carrying the admin capability.
    pub fn with_admin_token(self, token: &str) -> Self {
        self.with_token(token, token, true)
    }

    pub fn with_token(mut self, token: &str, name: &str, admin: bool) -> Self {
        self.config.admin.tokens.push(AdminTokenConfig {
            token: token.to_string(),
            name: name.to_string(),
            admin,
        });
        self
    }

    pub fn with_scheduler_enabled(mut self) -> Self {
        self.config.scheduler.enabled = true;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TestConfigBuilder::new().build();
        assert!(!config.scheduler.enabled);
        assert_eq!(config.retention.policies.len(), 5);
    }

    #[test]
    fn test_builder_in_memory() {
        let config = TestConfigBuilder::new().in_memory().build();
        assert_eq!(config.database.dsn, "sqlite::memory:");
    }

    #[test]
    fn test_with_policy_replaces_existing_entity() {
        let config = TestConfigBuilder::new()
            .with_policy(
                "audit_logs",
                Duration::from_secs(7 * 86_400),
                Strategy::Delete,
            )
            .build();

        let audit: Vec<_> = config
            .retention
            .policies
            .iter()
            .filter(|p| p.entity_type == "audit_logs")
            .collect();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].retention, Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_without_defaults() {
        let config = TestConfigBuilder::new()
            .without_defaults()
            .with_watched_entity("tasks")
            .with_admin_token("secret")
            .build();
        assert!(config.retention.policies.is_empty());
        assert!(config.partitions.is_empty());
        assert_eq!(config.metrics.watch_list, vec!["tasks".to_string()]);
        assert!(config.admin.tokens[0].admin);
    }
}
