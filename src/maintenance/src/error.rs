use chrono::{DateTime, Utc};
use common::config::Strategy;
use common::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("Failed to collect storage metrics for {entity_type}: {source}")]
    EntityCollection {
        entity_type: String,
        #[source]
        source: StoreError,
    },

    #[error("{strategy} policy for {entity_type} failed after {processed} rows: {source}")]
    PolicyExecution {
        entity_type: String,
        strategy: Strategy,
        processed: u64,
        #[source]
        source: StoreError,
    },

    #[error("Routine {routine} failed: {}", failures.join("; "))]
    Routine {
        routine: String,
        failures: Vec<String>,
    },

    #[error("No retention policy registered for {0}")]
    PolicyNotFound(String),

    #[error("{0} is not configured for partitioning")]
    UnknownPartitionedEntity(String),

    #[error("Invalid partition range for {entity_type}: {start} .. {end}")]
    InvalidPartitionRange {
        entity_type: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Partition {start} .. {end} of {entity_type} overlaps existing partition {existing}")]
    PartitionOverlap {
        entity_type: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        existing: String,
    },

    #[error("Invalid timezone '{timezone}': {message}")]
    InvalidTimezone { timezone: String, message: String },

    #[error("Invalid cadence '{cadence}': hour must be between 0 and 23")]
    InvalidCadence { cadence: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

impl MaintenanceError {
    pub fn routine(routine: impl Into<String>, failures: Vec<String>) -> Self {
        MaintenanceError::Routine {
            routine: routine.into(),
            failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_error_lists_failures() {
        let err = MaintenanceError::routine(
            "weekly-optimization",
            vec!["reindex audit_logs".to_string(), "refresh view".to_string()],
        );
        assert_eq!(
            err.to_string(),
            "Routine weekly-optimization failed: reindex audit_logs; refresh view"
        );
    }

    #[test]
    fn test_policy_execution_error_reports_partial_count() {
        let err = MaintenanceError::PolicyExecution {
            entity_type: "audit_logs".to_string(),
            strategy: Strategy::Delete,
            processed: 5000,
            source: StoreError::InvalidIdentifier("x y".to_string()),
        };
        assert!(err.to_string().contains("delete policy for audit_logs failed after 5000 rows"));
    }
}
