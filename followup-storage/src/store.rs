//! Persistent store traits.
//!
//! The store is opened once per request as a [`Session`] and dropped when the
//! request ends. Entity reads and writes go through the scoped layer in
//! [`crate::scoped`]; the raw trait methods here are its backend.

use async_trait::async_trait;
use followup_core::{
    AccountMapping, ApiRateLimit, AuditRecord, CrmConnection, EntityId, LimitPeriod,
    MeetingSession, StorageResult, Tenant, TenantId, TenantScoped, User,
};

/// Tenant table access. Soft-deleted tenants are invisible to every lookup.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn tenant_by_external_id(&self, external_id: &str) -> StorageResult<Option<Tenant>>;

    async fn tenant_by_id(&self, id: TenantId) -> StorageResult<Option<Tenant>>;

    /// Insert a tenant. Fails with `UniqueViolation` when a live tenant with
    /// the same external id exists.
    async fn insert_tenant(&self, tenant: &Tenant) -> StorageResult<()>;

    async fn update_tenant(&self, tenant: &Tenant) -> StorageResult<()>;

    /// Live tenants whose subscription permits access, most recently
    /// updated first.
    async fn active_tenants(&self, limit: usize) -> StorageResult<Vec<Tenant>>;
}

/// Row access for one tenant-scoped table.
///
/// `get` is an unscoped primary-key load; callers must run the result
/// through `verify_access`. Every other method is keyed on the tenant.
#[async_trait]
pub trait EntityStore<T: TenantScoped>: Send + Sync {
    async fn get(&self, id: EntityId) -> StorageResult<Option<T>>;

    /// Rows of `tenant_id` ordered by creation, soft-deleted rows only when
    /// `include_deleted` is set, at most `limit` of them.
    async fn list(
        &self,
        tenant_id: TenantId,
        include_deleted: bool,
        limit: Option<usize>,
    ) -> StorageResult<Vec<T>>;

    async fn insert(&self, entity: &T) -> StorageResult<()>;

    /// Overwrite the row matching both `id` and `tenant_id`.
    async fn update(&self, entity: &T) -> StorageResult<()>;

    /// Physically remove the row matching both `id` and `tenant_id`.
    async fn remove(&self, entity: &T) -> StorageResult<()>;
}

/// Single-row lookups on the keys the request path hits on every command.
///
/// Each is keyed on the tenant and returns live rows only. Results still go
/// through [`crate::scoped::lookup_scoped`].
#[async_trait]
pub trait LookupStore: Send + Sync {
    async fn user_by_external_id(
        &self,
        tenant_id: TenantId,
        external_user_id: &str,
    ) -> StorageResult<Option<User>>;

    async fn rate_limit_counter(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        period: LimitPeriod,
    ) -> StorageResult<Option<ApiRateLimit>>;

    /// The oldest unfinished session `user_id` has for `recording_id`.
    async fn open_meeting_session(
        &self,
        tenant_id: TenantId,
        user_id: EntityId,
        recording_id: &str,
    ) -> StorageResult<Option<MeetingSession>>;
}

/// Everything one request may touch.
pub trait Session:
    TenantStore
    + LookupStore
    + EntityStore<User>
    + EntityStore<CrmConnection>
    + EntityStore<MeetingSession>
    + EntityStore<AccountMapping>
    + EntityStore<ApiRateLimit>
    + EntityStore<AuditRecord>
    + Send
    + Sync
    + 'static
{
}

impl<S> Session for S where
    S: TenantStore
        + LookupStore
        + EntityStore<User>
        + EntityStore<CrmConnection>
        + EntityStore<MeetingSession>
        + EntityStore<AccountMapping>
        + EntityStore<ApiRateLimit>
        + EntityStore<AuditRecord>
        + Send
        + Sync
        + 'static
{
}

/// A source of request-scoped sessions.
#[async_trait]
pub trait Database: Clone + Send + Sync + 'static {
    type Session: Session;

    /// Open a session for one request. The session is never shared.
    async fn session(&self) -> StorageResult<Self::Session>;

    /// Cheap liveness probe for health checks.
    async fn ping(&self) -> StorageResult<()>;
}
