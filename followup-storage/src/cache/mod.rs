//! Cache layer for tenant lookups.
//!
//! The cache is a shared key-value store with per-entry TTL sitting in front
//! of the tenant table. It is an optimization only: every backend failure is
//! reported as a [`CacheError`](followup_core::CacheError) which the tenant
//! cache logs and treats as a miss.
//!
//! # Example
//!
//! ```ignore
//! let backend: Arc<dyn CacheBackend> = Arc::new(LmdbCacheBackend::new(path, 64)?);
//! let key = TenantCacheKey::external_id("T024BE7LD");
//! backend.set(key.as_str(), &bytes, Duration::from_secs(300)).await?;
//! ```

pub mod lmdb_backend;
pub mod memory_backend;
pub mod tenant_key;
pub mod traits;

pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use tenant_key::{TenantCacheKey, TENANT_KEY_PREFIX};
pub use traits::{CacheBackend, CacheResult, CacheStats};
