//! Retention policies and their enforcement.
//!
//! A [`PolicyRegistry`] is built once from configuration; the
//! [`ArchiveExecutor`] applies its policies with one of three strategies:
//!
//! - `delete`: rows past the window are removed in batches
//! - `archive`: rows are copied into `{entity}_Archive`, then removed
//! - `compress`: a JSON column is replaced by a size summary

pub mod executor;
pub mod policy;

pub use executor::{ArchiveExecutor, CleanupSummary, PolicyFailure, PolicyOutcome};
pub use policy::{PolicyRegistry, RetentionConfigError, RetentionPolicy};
