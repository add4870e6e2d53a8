//! Shared application state for Axum routers.

use std::sync::Arc;

use followup_storage::{
    CacheBackend, Database, InMemoryCacheBackend, LmdbCacheBackend, TenantCache,
};

use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::resolver::TenantResolver;

/// Application-wide state shared across all routes.
///
/// `D` is the persistent store. Production uses [`crate::db::DbClient`];
/// router tests use `followup_storage::MockStorage`.
#[derive(Clone)]
pub struct AppState<D: Database> {
    /// Store handle. Each request checks out its own session from it.
    pub db: D,
    /// Read-through tenant cache, shared by all requests.
    pub cache: Arc<TenantCache>,
    pub resolver: Arc<TenantResolver>,
    pub config: Arc<AppConfig>,
    pub start_time: std::time::Instant,
}

impl<D: Database> AppState<D> {
    pub fn new(db: D, cache: TenantCache, resolver: TenantResolver, config: AppConfig) -> Self {
        Self {
            db,
            cache: Arc::new(cache),
            resolver: Arc::new(resolver),
            config: Arc::new(config),
            start_time: std::time::Instant::now(),
        }
    }

    /// Build the state from configuration: cache backend, resolver and all.
    pub fn from_config(db: D, config: AppConfig) -> ApiResult<Self> {
        let cache = build_tenant_cache(&config)?;
        let resolver = TenantResolver::from_config(&config)?;
        Ok(Self::new(db, cache, resolver, config))
    }
}

/// LMDB when a cache path is configured, in-memory otherwise, nothing when
/// caching is off.
pub fn build_tenant_cache(config: &AppConfig) -> ApiResult<TenantCache> {
    if !config.cache_enabled {
        tracing::info!("Tenant cache disabled, every lookup goes to the store");
        return Ok(TenantCache::store_only());
    }

    let backend: Arc<dyn CacheBackend> = match &config.cache_path {
        Some(path) => {
            let backend = LmdbCacheBackend::new(path, config.cache_map_size_mb).map_err(|e| {
                ApiError::internal_error(format!("Failed to open tenant cache: {}", e))
            })?;
            tracing::info!(path = %path.display(), map_size_mb = config.cache_map_size_mb, "LMDB tenant cache opened");
            Arc::new(backend)
        }
        None => Arc::new(InMemoryCacheBackend::new()),
    };

    Ok(TenantCache::new(backend, config.tenant_cache_config()))
}

crate::impl_from_ref!(Arc<TenantCache>, cache);
crate::impl_from_ref!(Arc<TenantResolver>, resolver);
crate::impl_from_ref!(Arc<AppConfig>, config);
crate::impl_from_ref!(std::time::Instant, start_time);

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_disabled_cache_is_store_only() {
        let config = AppConfig {
            cache_enabled: false,
            ..AppConfig::default()
        };
        let cache = build_tenant_cache(&config).expect("cache");
        assert!(!cache.config().enabled);
        assert!(cache.stats().await.is_none());
    }

    #[tokio::test]
    async fn test_lmdb_cache_from_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = AppConfig {
            cache_path: Some(PathBuf::from(dir.path())),
            cache_map_size_mb: 8,
            ..AppConfig::default()
        };
        let cache = build_tenant_cache(&config).expect("cache");
        assert!(cache.config().enabled);
        assert!(cache.stats().await.is_some());
    }

    #[test]
    fn test_from_config_requires_secret_when_verifying() {
        let config = AppConfig {
            verify_signatures: true,
            signing_secret: None,
            ..AppConfig::default()
        };
        let result = AppState::from_config(followup_storage::MockStorage::new(), config);
        assert!(result.is_err());
    }
}
