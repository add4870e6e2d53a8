//! In-process cache backend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use followup_core::CacheError;
use tokio::time::Instant;

use super::traits::{CacheBackend, CacheResult, CacheStats};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// `HashMap` cache for single-process deployments and tests.
///
/// Expiry uses the tokio clock, so paused-time tests can advance past a TTL.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, Entry>>,
    stats: RwLock<CacheStats>,
}

fn poisoned() -> CacheError {
    CacheError::Backend {
        reason: "in-memory cache lock poisoned".to_string(),
    }
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stats(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    /// Keys currently stored, expired ones included.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let lookup = entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => {
                drop(entries);
                self.with_stats(|s| s.hits += 1);
                Ok(Some(value))
            }
            Some(None) => {
                entries.remove(key);
                drop(entries);
                self.with_stats(|s| {
                    s.misses += 1;
                    s.expirations += 1;
                    s.entry_count = s.entry_count.saturating_sub(1);
                });
                Ok(None)
            }
            None => {
                drop(entries);
                self.with_stats(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let entry = Entry {
            value: value.to_vec(),
            expires_at: Instant::now() + ttl,
        };
        let previous = self
            .entries
            .write()
            .map_err(|_| poisoned())?
            .insert(key.to_string(), entry);
        if previous.is_none() {
            self.with_stats(|s| s.entry_count += 1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let removed = self
            .entries
            .write()
            .map_err(|_| poisoned())?
            .remove(key)
            .is_some();
        if removed {
            self.with_stats(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        let removed = (before - entries.len()) as u64;
        drop(entries);
        self.with_stats(|s| s.entry_count = s.entry_count.saturating_sub(removed));
        Ok(removed)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default())
    }
}
