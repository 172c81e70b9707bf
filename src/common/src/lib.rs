pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use store::{RelationalStore, SqlStore, StoreError};
