//! Retention policies and their registry.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::{PolicyConfig, RetentionConfig, Strategy, Sweep};
use common::store::{RowFilter, is_valid_identifier};
use thiserror::Error;

use crate::error::MaintenanceError;

/// Errors in the static retention configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetentionConfigError {
    #[error("Duplicate retention policy for {0}")]
    DuplicatePolicy(String),

    #[error("Retention window for {entity_type} must be greater than zero, got {duration:?}")]
    InvalidRetentionWindow {
        entity_type: String,
        duration: Duration,
    },

    #[error("Retention window for {0} reaches before the representable time range")]
    WindowTooLarge(String),

    #[error("Invalid identifier '{identifier}' in policy for {entity_type}")]
    InvalidIdentifier {
        entity_type: String,
        identifier: String,
    },

    #[error("Compress policy for {0} requires a compress_column")]
    MissingCompressColumn(String),

    #[error("Selector for {0} must be a single predicate")]
    InvalidSelector(String),

    #[error("Batch size must be greater than zero")]
    InvalidBatchSize,
}

/// Rule pairing an entity type with a maximum age and a disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub entity_type: String,
    pub retention_window: Duration,
    pub strategy: Strategy,
    pub selector: Option<String>,
    pub timestamp_column: String,
    pub compress_column: Option<String>,
    pub sweep: Sweep,
}

impl RetentionPolicy {
    fn from_config(config: &PolicyConfig) -> Result<Self, RetentionConfigError> {
        let entity_type = config.entity_type.clone();

        if config.retention.is_zero() {
            return Err(RetentionConfigError::InvalidRetentionWindow {
                entity_type,
                duration: config.retention,
            });
        }

        let mut identifiers = vec![&config.entity_type, &config.timestamp_column];
        identifiers.extend(config.compress_column.as_ref());
        if let Some(bad) = identifiers.into_iter().find(|i| !is_valid_identifier(i)) {
            return Err(RetentionConfigError::InvalidIdentifier {
                entity_type,
                identifier: bad.clone(),
            });
        }

        if config.strategy == Strategy::Compress && config.compress_column.is_none() {
            return Err(RetentionConfigError::MissingCompressColumn(entity_type));
        }

        if let Some(selector) = &config.selector
            && (selector.trim().is_empty() || selector.contains(';'))
        {
            return Err(RetentionConfigError::InvalidSelector(entity_type));
        }

        let policy = Self {
            entity_type,
            retention_window: config.retention,
            strategy: config.strategy,
            selector: config.selector.clone(),
            timestamp_column: config.timestamp_column.clone(),
            compress_column: config.compress_column.clone(),
            sweep: config.sweep,
        };

        if policy.cutoff(Utc::now()).is_none() {
            return Err(RetentionConfigError::WindowTooLarge(policy.entity_type));
        }
        Ok(policy)
    }

    /// Rows strictly older than this instant are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let window = chrono::Duration::from_std(self.retention_window).ok()?;
        now.checked_sub_signed(window)
    }

    pub fn row_filter(&self, now: DateTime<Utc>) -> RowFilter {
        RowFilter {
            table: self.entity_type.clone(),
            timestamp_column: self.timestamp_column.clone(),
            // Validation guarantees a cutoff; the fallback expires nothing.
            cutoff: self.cutoff(now).unwrap_or(DateTime::<Utc>::MIN_UTC),
            selector: self.selector.clone(),
        }
    }
}

/// Static table of retention rules, one per entity type.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: Vec<RetentionPolicy>,
    by_entity: HashMap<String, usize>,
}

impl PolicyRegistry {
    /// Build and validate the registry from configuration.
    pub fn new(config: &RetentionConfig) -> Result<Self, RetentionConfigError> {
        if config.batch_size == 0 {
            return Err(RetentionConfigError::InvalidBatchSize);
        }

        let mut registry = Self::default();
        for policy_config in &config.policies {
            let policy = RetentionPolicy::from_config(policy_config)?;
            if registry.by_entity.contains_key(&policy.entity_type) {
                return Err(RetentionConfigError::DuplicatePolicy(policy.entity_type));
            }
            registry
                .by_entity
                .insert(policy.entity_type.clone(), registry.policies.len());
            registry.policies.push(policy);
        }
        Ok(registry)
    }

    pub fn get_policy(&self, entity_type: &str) -> Result<&RetentionPolicy, MaintenanceError> {
        self.by_entity
            .get(entity_type)
            .map(|&idx| &self.policies[idx])
            .ok_or_else(|| MaintenanceError::PolicyNotFound(entity_type.to_string()))
    }

    /// Policies in configuration order.
    pub fn list_policies(&self) -> &[RetentionPolicy] {
        &self.policies
    }

    /// Policies enforced by a cadence; the monthly sweep covers all of them.
    pub fn policies_for_sweep(&self, sweep: Sweep) -> Vec<&RetentionPolicy> {
        self.policies
            .iter()
            .filter(|p| sweep == Sweep::Monthly || p.sweep == sweep)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
