//! Query result cache shared by readers of the maintained store.
//!
//! Maintenance only needs to clear it; [`InMemoryQueryCache`] is the
//! process-local implementation used by the service.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::CacheConfig;

/// Operations maintenance performs on the query cache.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Drop every entry, returning how many were removed.
    async fn invalidate_all(&self) -> usize;

    /// Drop entries whose key starts with `prefix`.
    async fn invalidate_prefix(&self, prefix: &str) -> usize;

    /// Drop entries whose TTL has elapsed.
    async fn sweep_expired(&self) -> usize;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryQueryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl InMemoryQueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl: config.default_ttl,
            max_entries: config.max_entries,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.insert_with_ttl(key, value, self.default_ttl).await;
    }

    /// Insert with an explicit TTL. When full, expired entries are dropped
    /// first and then the entry closest to expiry.
    pub async fn insert_with_ttl(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value: value.into(),
                expires_at: now + ttl,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl QueryCache for InMemoryQueryCache {
    async fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        removed
    }

    async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}
