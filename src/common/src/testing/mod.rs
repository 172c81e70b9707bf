//! Test utilities for housekeeper.
//!
//! This module provides reusable test utilities for creating test configurations
//! and an in-process [`FakeStore`] with failure injection.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{FakeStore, TestConfigBuilder};
//!
//! let config = TestConfigBuilder::new()
//!     .in_memory()
//!     .with_admin_token("ops-secret")
//!     .build();
//! let store = FakeStore::new();
//! store.add_table("audit_logs");
//! ```

mod config_builder;
mod fake_store;

pub use config_builder::TestConfigBuilder;
pub use fake_store::{FakeRow, FakeStore};
