//! Cache backend trait.

use async_trait::async_trait;
use followup_core::CacheError;
use std::time::Duration;

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Key-value cache with per-entry TTL.
///
/// Backends are shared across requests behind an `Arc`, so every method takes
/// `&self`. Values are opaque bytes; the caller owns the encoding. Writes for
/// one key always carry the same logical value, so racing writers only race
/// on the TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Fetch a live entry. Expired entries read as `None`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Remove one entry, reporting whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry whose key starts with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64>;

    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses, expired entries included.
    pub misses: u64,
    /// Number of entries currently stored, expired ones not yet purged included.
    pub entry_count: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate as a fraction in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
