//! Tenant-scoped reads and writes.
//!
//! Every function here reads the tenant from [`crate::context`] and refuses
//! to run without one. Rows are filtered by tenant in the store query and
//! checked again after they come back.

use std::future::Future;
use std::marker::PhantomData;

use chrono::Utc;
use followup_core::{
    DeletionPolicy, EntityId, EntityKind, NewScoped, Resource, ScopeError, ScopeResult,
    StorageResult, TenantId, TenantScoped,
};

use crate::context;
use crate::store::EntityStore;

/// How [`delete_scoped`] removes a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// Set `deleted_at`; the row stays in the table.
    #[default]
    Soft,
    /// Remove the row.
    Hard,
}

fn log_security_violation(
    operation: &'static str,
    kind: EntityKind,
    resource_id: EntityId,
    owner: TenantId,
    current: TenantId,
) {
    tracing::error!(
        target: "security",
        operation,
        resource_type = %kind,
        %resource_id,
        resource_tenant_id = %owner,
        current_tenant_id = %current,
        "cross-tenant access blocked"
    );
}

fn security_violation(
    operation: &'static str,
    kind: EntityKind,
    resource_id: EntityId,
    owner: TenantId,
    current: TenantId,
) -> ScopeError {
    log_security_violation(operation, kind, resource_id, owner, current);
    ScopeError::AccessDenied {
        kind,
        resource_id,
        owner,
        current,
    }
}

type RowFilter<'a, T> = Box<dyn Fn(&T) -> bool + Send + Sync + 'a>;

/// Query over one entity type, bound to the tenant that was current when it
/// was built.
pub struct ScopedQuery<'a, T, S: ?Sized> {
    store: &'a S,
    tenant_id: TenantId,
    include_deleted: bool,
    filters: Vec<RowFilter<'a, T>>,
    limit: Option<usize>,
    _entity: PhantomData<fn() -> T>,
}

/// Start a query for `T` in the current tenant.
pub fn scoped_query<T, S>(store: &S) -> ScopeResult<ScopedQuery<'_, T, S>>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
{
    let tenant_id = context::current_tenant_id()?;
    Ok(ScopedQuery {
        store,
        tenant_id,
        include_deleted: false,
        filters: Vec::new(),
        limit: None,
        _entity: PhantomData,
    })
}

impl<'a, T, S> ScopedQuery<'a, T, S>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
{
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Include soft-deleted rows.
    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'a) -> Self {
        self.filters.push(Box::new(predicate));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Run the query. The limit is pushed into the store when no row filter
    /// is set; otherwise it applies after filtering.
    pub async fn all(self) -> ScopeResult<Vec<T>> {
        let store_limit = if self.filters.is_empty() { self.limit } else { None };
        let rows = self
            .store
            .list(self.tenant_id, self.include_deleted, store_limit)
            .await?;
        let tenant_id = self.tenant_id;
        let include_deleted = self.include_deleted;

        let mut out = Vec::new();
        for row in rows {
            if row.tenant_id() != tenant_id {
                // Logged and dropped; the caller still gets its own rows.
                log_security_violation(
                    "query",
                    T::KIND,
                    row.resource_id(),
                    row.tenant_id(),
                    tenant_id,
                );
                continue;
            }
            if !include_deleted && row.is_deleted() {
                continue;
            }
            if !self.filters.iter().all(|keep| keep(&row)) {
                continue;
            }
            out.push(row);
            if self.limit.is_some_and(|n| out.len() >= n) {
                break;
            }
        }
        Ok(out)
    }

    pub async fn first(self) -> ScopeResult<Option<T>> {
        Ok(self.limit(1).all().await?.into_iter().next())
    }

    pub async fn count(self) -> ScopeResult<usize> {
        Ok(self.all().await?.len())
    }
}

/// Check that `resource` belongs to the current tenant.
///
/// Resources without an owner pass. A mismatch is logged as a security
/// event and returned as `AccessDenied`.
pub fn verify_access<R>(resource: &R) -> ScopeResult<bool>
where
    R: Resource + ?Sized,
{
    let current = context::current_tenant_id()?;
    match resource.owner() {
        None => Ok(true),
        Some(owner) if owner == current => Ok(true),
        Some(owner) => Err(security_violation(
            "verify_access",
            R::KIND,
            resource.resource_id(),
            owner,
            current,
        )),
    }
}

/// Boolean form of [`verify_access`]. Never fails.
pub fn check_access<R>(resource: &R) -> bool
where
    R: Resource + ?Sized,
{
    verify_access(resource).is_ok()
}

/// Verify every resource, stopping at the first failure.
pub fn bulk_verify_access<R: Resource>(resources: &[R]) -> ScopeResult<bool> {
    for resource in resources {
        verify_access(resource)?;
    }
    Ok(true)
}

/// Build `draft` for the current tenant and insert it.
pub async fn create_scoped<D, S>(store: &S, draft: D) -> ScopeResult<D::Entity>
where
    D: NewScoped,
    S: EntityStore<D::Entity> + ?Sized,
{
    let tenant_id = context::current_tenant_id()?;
    let requested = draft.requested_tenant();
    let entity = draft.build(tenant_id, Utc::now());

    if let Some(requested) = requested.filter(|r| *r != tenant_id) {
        return Err(security_violation(
            "create",
            <D::Entity as Resource>::KIND,
            entity.resource_id(),
            requested,
            tenant_id,
        ));
    }

    store.insert(&entity).await?;
    tracing::debug!(
        %tenant_id,
        resource_type = %<D::Entity as Resource>::KIND,
        resource_id = %entity.resource_id(),
        "scoped entity created"
    );
    Ok(entity)
}

/// Load `id` and check it belongs to the current tenant.
///
/// Soft-deleted rows are reported as absent once ownership is confirmed.
pub async fn get_scoped_by_id<T, S>(store: &S, id: EntityId) -> ScopeResult<Option<T>>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
{
    context::current_tenant_id()?;
    match store.get(id).await? {
        Some(row) => {
            verify_access(&row)?;
            Ok((!row.is_deleted()).then_some(row))
        }
        None => Ok(None),
    }
}

/// Run a keyed store lookup for the current tenant.
///
/// `lookup` receives the tenant id from context. Whatever it returns is
/// verified like a primary-key load, and soft-deleted rows are hidden.
pub async fn lookup_scoped<T, F, Fut>(lookup: F) -> ScopeResult<Option<T>>
where
    T: TenantScoped,
    F: FnOnce(TenantId) -> Fut,
    Fut: Future<Output = StorageResult<Option<T>>>,
{
    let tenant_id = context::current_tenant_id()?;
    match lookup(tenant_id).await? {
        Some(row) => {
            verify_access(&row)?;
            Ok((!row.is_deleted()).then_some(row))
        }
        None => Ok(None),
    }
}

pub async fn count_scoped<T, S>(store: &S) -> ScopeResult<usize>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
{
    scoped_query::<T, S>(store)?.count().await
}

/// Apply `mutate` to `entity` and persist it.
///
/// The tenant reference may not change, and the write only matches the row
/// with the same id and tenant.
pub async fn update_scoped<T, S, F>(store: &S, entity: T, mutate: F) -> ScopeResult<T>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
    F: FnOnce(&mut T) + Send,
{
    if T::DELETION == DeletionPolicy::Immutable {
        return Err(ScopeError::Immutable { kind: T::KIND });
    }
    verify_access(&entity)?;

    let original = entity.tenant_id();
    let mut entity = entity;
    mutate(&mut entity);
    if entity.tenant_id() != original {
        tracing::error!(
            target: "security",
            resource_type = %T::KIND,
            resource_id = %entity.resource_id(),
            from = %original,
            to = %entity.tenant_id(),
            "tenant reassignment refused"
        );
        return Err(ScopeError::TenantReassignment {
            kind: T::KIND,
            resource_id: entity.resource_id(),
            from: original,
            to: entity.tenant_id(),
        });
    }

    entity.touch(Utc::now());
    store.update(&entity).await?;
    Ok(entity)
}

/// Delete `entity`. Immutable entity types refuse regardless of context.
pub async fn delete_scoped<T, S>(store: &S, entity: T, mode: DeleteMode) -> ScopeResult<()>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
{
    let resource_id = entity.resource_id();
    if T::DELETION == DeletionPolicy::Immutable {
        tracing::warn!(
            resource_type = %T::KIND,
            %resource_id,
            "refusing to delete immutable record"
        );
        return Err(ScopeError::Immutable { kind: T::KIND });
    }
    verify_access(&entity)?;

    match mode {
        DeleteMode::Soft => {
            let mut entity = entity;
            let now = Utc::now();
            entity.set_deleted_at(Some(now));
            entity.touch(now);
            store.update(&entity).await?;
        }
        DeleteMode::Hard => store.remove(&entity).await?,
    }
    tracing::debug!(resource_type = %T::KIND, %resource_id, ?mode, "scoped entity deleted");
    Ok(())
}

/// Clear `deleted_at` on a soft-deleted entity.
pub async fn restore_scoped<T, S>(store: &S, entity: T) -> ScopeResult<T>
where
    T: TenantScoped,
    S: EntityStore<T> + ?Sized,
{
    if T::DELETION == DeletionPolicy::Immutable {
        return Err(ScopeError::Immutable { kind: T::KIND });
    }
    verify_access(&entity)?;
    let mut entity = entity;
    entity.set_deleted_at(None);
    entity.touch(Utc::now());
    store.update(&entity).await?;
    Ok(entity)
}
