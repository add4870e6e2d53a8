//! Per-task tenant context.
//!
//! The current tenant lives in a tokio task-local slot. A slot exists only
//! inside a scope opened by [`with_tenant`], [`with_tenant_blocking`] or
//! [`tenant_scope`]; when the scope's future completes, fails, panics or is
//! dropped, the slot disappears with it, so no tenant survives its request.
//! Nested scopes shadow the outer slot and the outer value is visible again
//! once the inner scope ends.
//!
//! Spawned tasks do not inherit the slot. Background work gets a tenant only
//! through [`spawn_with_tenant`] or by opening its own scope.
//!
//! This is the ambient accessor for the request boundary. Code that already
//! holds the tenant should pass it along instead of reading it back.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use followup_core::{ContextError, Tenant, TenantId};
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT_TENANT: RefCell<Option<Arc<Tenant>>>;
}

fn validate(tenant: &Tenant) -> Result<(), ContextError> {
    if tenant.external_id.trim().is_empty() {
        return Err(ContextError::InvalidTenant {
            reason: format!("tenant {} has no external id", tenant.id),
        });
    }
    if tenant.is_deleted() {
        return Err(ContextError::InvalidTenant {
            reason: format!("tenant {} is deleted", tenant.id),
        });
    }
    Ok(())
}

/// Replace the tenant of the enclosing scope.
pub fn set(tenant: Arc<Tenant>) -> Result<(), ContextError> {
    validate(&tenant)?;
    let tenant_id = tenant.id;
    CURRENT_TENANT
        .try_with(|slot| *slot.borrow_mut() = Some(tenant))
        .map_err(|_| ContextError::NoScope)?;
    tracing::debug!(%tenant_id, "tenant context set");
    Ok(())
}

/// The current tenant, or `NoTenant` when none is set.
pub fn get() -> Result<Arc<Tenant>, ContextError> {
    get_optional().ok_or(ContextError::NoTenant)
}

pub fn get_optional() -> Option<Arc<Tenant>> {
    CURRENT_TENANT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

pub fn current_tenant_id() -> Result<TenantId, ContextError> {
    get().map(|tenant| tenant.id)
}

/// Empty the enclosing scope's slot. A no-op outside any scope.
pub fn clear() {
    let cleared = CURRENT_TENANT
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten();
    if let Some(tenant) = cleared {
        tracing::debug!(tenant_id = %tenant.id, "tenant context cleared");
    }
}

/// Run `future` with `tenant` as the current tenant.
///
/// The previous value (or absence of one) is back in place once `future`
/// finishes, however it finishes.
pub async fn with_tenant<F>(tenant: Arc<Tenant>, future: F) -> Result<F::Output, ContextError>
where
    F: Future,
{
    validate(&tenant)?;
    Ok(CURRENT_TENANT
        .scope(RefCell::new(Some(tenant)), future)
        .await)
}

/// Blocking counterpart of [`with_tenant`] for use inside `spawn_blocking`.
pub fn with_tenant_blocking<R>(
    tenant: Arc<Tenant>,
    f: impl FnOnce() -> R,
) -> Result<R, ContextError> {
    validate(&tenant)?;
    Ok(CURRENT_TENANT.sync_scope(RefCell::new(Some(tenant)), f))
}

/// Run `future` inside an empty slot so it can call [`set`] and [`clear`].
pub async fn tenant_scope<F: Future>(future: F) -> F::Output {
    CURRENT_TENANT.scope(RefCell::new(None), future).await
}

/// Spawn a task that runs with its own copy of `tenant`.
pub fn spawn_with_tenant<F>(
    tenant: Arc<Tenant>,
    future: F,
) -> Result<JoinHandle<F::Output>, ContextError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    validate(&tenant)?;
    Ok(tokio::spawn(
        CURRENT_TENANT.scope(RefCell::new(Some(tenant)), future),
    ))
}

/// Call `f` with the current tenant, failing before `f` runs if none is set.
pub fn require_tenant<R>(f: impl FnOnce(Arc<Tenant>) -> R) -> Result<R, ContextError> {
    let tenant = get()?;
    Ok(f(tenant))
}

/// Async form of [`require_tenant`].
pub async fn require_tenant_async<F, Fut>(f: F) -> Result<Fut::Output, ContextError>
where
    F: FnOnce(Arc<Tenant>) -> Fut,
    Fut: Future,
{
    let tenant = get()?;
    Ok(f(tenant).await)
}
