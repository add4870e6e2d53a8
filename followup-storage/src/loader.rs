//! Read-through tenant cache.
//!
//! Resolves a Slack team id to its tenant row. The cache holds a reduced JSON
//! projection keyed by external id; the store row stays the authority for
//! every access decision.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use followup_core::{
    AuditCategory, AuditRecord, CacheError, CrmProviderKind, EntityKind, Installation,
    NewAuditRecord, NewScoped, PlanTier, StorageError, SubscriptionStatus, Tenant, TenantError,
    TenantId, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::timeout;

use crate::cache::{CacheBackend, CacheStats, TenantCacheKey, TENANT_KEY_PREFIX};
use crate::store::{EntityStore, TenantStore};

/// Configuration for the tenant cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantCacheConfig {
    /// When false every lookup goes to the store.
    pub enabled: bool,
    /// Lifetime of a cached projection.
    pub ttl: Duration,
    /// Upper bound on one cache round trip or audit write.
    pub op_timeout: Duration,
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            op_timeout: Duration::from_secs(2),
        }
    }
}

impl TenantCacheConfig {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }
}

/// Flat tenant projection stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTenant {
    pub id: TenantId,
    pub external_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub plan_tier: PlanTier,
    pub subscription_status: SubscriptionStatus,
    pub default_crm_provider: Option<CrmProviderKind>,
    pub timezone: String,
    pub locale: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Tenant> for CachedTenant {
    fn from(tenant: &Tenant) -> Self {
        Self {
            id: tenant.id,
            external_id: tenant.external_id.clone(),
            name: tenant.name.clone(),
            domain: tenant.domain.clone(),
            plan_tier: tenant.plan_tier,
            subscription_status: tenant.subscription_status,
            default_crm_provider: tenant.default_crm_provider,
            timezone: tenant.timezone.clone(),
            locale: tenant.locale.clone(),
            created_at: tenant.created_at,
            updated_at: tenant.updated_at,
        }
    }
}

/// Where a resolution found its tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    Cache,
    Database,
}

impl LoadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadSource::Cache => "cache",
            LoadSource::Database => "database",
        }
    }
}

/// A tenant that passed the subscription check.
#[derive(Debug, Clone)]
pub struct ResolvedTenant {
    pub tenant: Arc<Tenant>,
    pub source: LoadSource,
}

/// Result of [`TenantCache::provision`].
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub tenant: Tenant,
    pub created: bool,
}

/// Read-through cache in front of the tenant table.
///
/// Cache failures of any kind degrade to the store and are logged at warn.
pub struct TenantCache {
    backend: Option<Arc<dyn CacheBackend>>,
    config: TenantCacheConfig,
}

impl TenantCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: TenantCacheConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    /// A cache that always reads the store.
    pub fn store_only() -> Self {
        Self {
            backend: None,
            config: TenantCacheConfig::default().with_enabled(false),
        }
    }

    pub fn config(&self) -> &TenantCacheConfig {
        &self.config
    }

    fn active_backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.backend.as_ref().filter(|_| self.config.enabled)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match timeout(self.config.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                operation,
                elapsed: self.config.op_timeout,
            }),
        }
    }

    /// Resolve `external_id` to a tenant allowed to make requests.
    pub async fn get_or_load<S>(
        &self,
        external_id: &str,
        store: &S,
    ) -> Result<ResolvedTenant, TenantError>
    where
        S: TenantStore + EntityStore<AuditRecord> + ?Sized,
    {
        let (tenant, source) = match self.lookup_cached(external_id, store).await? {
            Some(tenant) => (tenant, LoadSource::Cache),
            None => {
                let tenant = store
                    .tenant_by_external_id(external_id)
                    .await?
                    .ok_or_else(|| TenantError::NotFound {
                        external_id: external_id.to_string(),
                    })?;
                self.write_through(&tenant).await;
                (tenant, LoadSource::Database)
            }
        };

        tracing::debug!(
            tenant_id = %tenant.id,
            external_id,
            source = source.as_str(),
            "tenant loaded"
        );
        self.record_access(store, &tenant, source).await;

        if let Err(reason) = tenant.check_access(Utc::now()) {
            tracing::warn!(
                tenant_id = %tenant.id,
                external_id,
                reason = reason.as_str(),
                "tenant access refused"
            );
            return Err(TenantError::Suspended {
                external_id: external_id.to_string(),
                reason,
            });
        }

        Ok(ResolvedTenant {
            tenant: Arc::new(tenant),
            source,
        })
    }

    /// Cache hit path: the projection names the row, the store supplies it.
    async fn lookup_cached<S>(
        &self,
        external_id: &str,
        store: &S,
    ) -> Result<Option<Tenant>, StorageError>
    where
        S: TenantStore + ?Sized,
    {
        let Some(backend) = self.active_backend() else {
            return Ok(None);
        };
        let key = TenantCacheKey::external_id(external_id);

        let bytes = match self.bounded("get", backend.get(key.as_str())).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(error = %e, backend = backend.name(), external_id, "cache read failed, using store");
                return Ok(None);
            }
        };

        let projection = match serde_json::from_slice::<CachedTenant>(&bytes) {
            Ok(projection) if projection.external_id == external_id => projection,
            Ok(_) | Err(_) => {
                tracing::warn!(external_id, "discarding unreadable cache entry");
                self.evict(&key).await;
                return Ok(None);
            }
        };

        match store.tenant_by_id(projection.id).await? {
            Some(tenant) if tenant.external_id == external_id => Ok(Some(tenant)),
            _ => {
                tracing::debug!(external_id, "cached tenant no longer in store");
                self.evict(&key).await;
                Ok(None)
            }
        }
    }

    async fn write_through(&self, tenant: &Tenant) {
        let Some(backend) = self.active_backend() else {
            return;
        };
        let key = TenantCacheKey::external_id(&tenant.external_id);
        let bytes = match serde_json::to_vec(&CachedTenant::from(tenant)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode tenant projection");
                return;
            }
        };
        if let Err(e) = self
            .bounded("set", backend.set(key.as_str(), &bytes, self.config.ttl))
            .await
        {
            tracing::warn!(error = %e, backend = backend.name(), external_id = %tenant.external_id, "cache write failed");
        }
    }

    async fn evict(&self, key: &TenantCacheKey) {
        if let Some(backend) = self.active_backend() {
            if let Err(e) = self.bounded("delete", backend.delete(key.as_str())).await {
                tracing::warn!(error = %e, key = key.as_str(), "cache eviction failed");
            }
        }
    }

    async fn write_audit<S>(&self, store: &S, record: AuditRecord)
    where
        S: EntityStore<AuditRecord> + ?Sized,
    {
        let event_type = record.event_type.clone();
        match timeout(self.config.op_timeout, store.insert(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(error = %e, tenant_id = %record.tenant_id, event_type, "audit write failed");
            }
            Err(_) => {
                tracing::warn!(tenant_id = %record.tenant_id, event_type, "audit write timed out");
            }
        }
    }

    async fn record_access<S>(&self, store: &S, tenant: &Tenant, source: LoadSource)
    where
        S: EntityStore<AuditRecord> + ?Sized,
    {
        let record = NewAuditRecord::new("tenant.accessed", AuditCategory::DataAccess)
            .resource(EntityKind::Tenant, tenant.id.as_uuid())
            .metadata(json!({
                "source": source.as_str(),
                "external_id": tenant.external_id,
                "subscription_status": tenant.subscription_status.as_db_str(),
            }))
            .build(tenant.id, Utc::now());
        self.write_audit(store, record).await;
    }

    /// Return the tenant for an installation, creating it on first install.
    ///
    /// No subscription check runs here; the install flow decides what to do
    /// with a suspended workspace.
    pub async fn provision<S>(
        &self,
        store: &S,
        installation: Installation,
    ) -> Result<Provisioned, TenantError>
    where
        S: TenantStore + EntityStore<AuditRecord> + ?Sized,
    {
        if let Some(tenant) = store
            .tenant_by_external_id(&installation.external_id)
            .await?
        {
            return Ok(Provisioned {
                tenant,
                created: false,
            });
        }

        let external_id = installation.external_id.clone();
        let tenant = Tenant::provisioned(installation, Utc::now());
        match store.insert_tenant(&tenant).await {
            Ok(()) => {}
            Err(StorageError::UniqueViolation { .. }) => {
                // Lost a race with a concurrent install of the same workspace.
                let existing = store
                    .tenant_by_external_id(&external_id)
                    .await?
                    .ok_or(TenantError::NotFound {
                        external_id: external_id.clone(),
                    })?;
                return Ok(Provisioned {
                    tenant: existing,
                    created: false,
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(tenant_id = %tenant.id, external_id = %tenant.external_id, "tenant provisioned");
        let record = NewAuditRecord::new("tenant.created", AuditCategory::Configuration)
            .resource(EntityKind::Tenant, tenant.id.as_uuid())
            .description(format!("Tenant created for workspace {}", tenant.external_id))
            .metadata(json!({
                "source": "provisioning",
                "external_id": tenant.external_id,
                "plan_tier": tenant.plan_tier.as_db_str(),
            }))
            .build(tenant.id, tenant.created_at);
        self.write_audit(store, record).await;
        self.write_through(&tenant).await;

        Ok(Provisioned {
            tenant,
            created: true,
        })
    }

    /// Rewrite the projection after the tenant row changed.
    pub async fn refresh(&self, tenant: &Tenant) {
        if tenant.is_deleted() {
            self.evict(&TenantCacheKey::external_id(&tenant.external_id))
                .await;
        } else {
            self.write_through(tenant).await;
        }
    }

    /// Drop one tenant's projection.
    pub async fn invalidate(&self, external_id: &str) -> Result<bool, CacheError> {
        let Some(backend) = self.active_backend() else {
            return Ok(false);
        };
        let key = TenantCacheKey::external_id(external_id);
        self.bounded("delete", backend.delete(key.as_str())).await
    }

    /// Drop every tenant projection.
    pub async fn invalidate_all(&self) -> Result<u64, CacheError> {
        let Some(backend) = self.active_backend() else {
            return Ok(0);
        };
        let removed = self
            .bounded("delete_prefix", backend.delete_prefix(TENANT_KEY_PREFIX))
            .await?;
        tracing::info!(removed, "tenant cache cleared");
        Ok(removed)
    }

    /// Warm the cache with up to `limit` active tenants.
    pub async fn preload<S>(&self, store: &S, limit: usize) -> Result<usize, StorageError>
    where
        S: TenantStore + ?Sized,
    {
        if self.active_backend().is_none() {
            return Ok(0);
        }
        let tenants = store.active_tenants(limit).await?;
        for tenant in &tenants {
            self.write_through(tenant).await;
        }
        tracing::info!(count = tenants.len(), "tenant cache preloaded");
        Ok(tenants.len())
    }

    pub async fn stats(&self) -> Option<CacheStats> {
        let backend = self.active_backend()?;
        self.bounded("stats", backend.stats()).await.ok()
    }
}
