//! Capability traits for tenant-owned data

use crate::{EntityId, EntityKind, TenantId, Timestamp};

/// Anything that can be checked for tenant ownership.
///
/// `owner()` returning `None` marks a tenant-agnostic resource; access checks
/// treat those as exempt.
pub trait Resource {
    const KIND: EntityKind;

    fn resource_id(&self) -> EntityId;

    fn owner(&self) -> Option<TenantId>;
}

/// Whether rows of an entity type may be deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Rows carry a `deleted_at` marker; hard deletes are allowed on request.
    Soft,
    /// Rows are append-only.
    Immutable,
}

/// An entity stored in a tenant-partitioned table.
///
/// Implemented through [`impl_tenant_scoped!`](crate::impl_tenant_scoped) for
/// entities with the standard column set. The tenant reference is fixed at
/// creation.
pub trait TenantScoped: Resource + Clone + Send + Sync + 'static {
    const DELETION: DeletionPolicy = DeletionPolicy::Soft;

    fn tenant_id(&self) -> TenantId;

    fn created_at(&self) -> Timestamp;

    fn deleted_at(&self) -> Option<Timestamp>;

    fn set_deleted_at(&mut self, at: Option<Timestamp>);

    /// Record a modification time.
    fn touch(&mut self, at: Timestamp);

    fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }
}

/// Field set for a not-yet-persisted tenant-scoped entity.
///
/// The tenant reference is normally left unset and filled from the request
/// context. A draft that names a tenant must name the context tenant.
pub trait NewScoped: Send {
    type Entity: TenantScoped;

    fn requested_tenant(&self) -> Option<TenantId>;

    fn build(self, tenant_id: TenantId, now: Timestamp) -> Self::Entity;
}
