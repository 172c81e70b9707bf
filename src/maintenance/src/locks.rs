//! Per-entity mutual exclusion.
//!
//! Scheduled routines and admin triggers share one [`EntityLocks`], so two
//! mutating operations on the same entity type serialize while different
//! entity types proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
pub struct EntityLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, entity_type: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(entity_type.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `entity_type`; released on drop.
    pub async fn acquire(&self, entity_type: &str) -> OwnedMutexGuard<()> {
        self.entry(entity_type).lock_owned().await
    }
}
