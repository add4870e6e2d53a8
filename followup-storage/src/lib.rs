//! Followup Storage - Tenant Context, Cache and Scoped Persistence
//!
//! The per-task tenant slot, the read-through tenant cache in front of the
//! tenant table, and the only sanctioned path for reading and writing
//! tenant-owned rows. The Postgres store lives in followup-api; an in-memory
//! store ships here for tests.

pub mod cache;
pub mod context;
pub mod loader;
pub mod memory;
pub mod scoped;
pub mod store;

// Re-export cache types for API integration
pub use cache::{
    CacheBackend, CacheResult, CacheStats, InMemoryCacheBackend, LmdbCacheBackend,
    LmdbCacheError, TenantCacheKey, TENANT_KEY_PREFIX,
};
pub use loader::{
    CachedTenant, LoadSource, Provisioned, ResolvedTenant, TenantCache, TenantCacheConfig,
};
pub use memory::MockStorage;
pub use scoped::{
    bulk_verify_access, check_access, count_scoped, create_scoped, delete_scoped,
    get_scoped_by_id, lookup_scoped, restore_scoped, scoped_query, update_scoped, verify_access,
    DeleteMode, ScopedQuery,
};
pub use store::{Database, EntityStore, LookupStore, Session, TenantStore};
