//! Typed extractors for values the tenant middleware places in request
//! extensions.

use std::ops::Deref;
use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use followup_core::Tenant;

use crate::error::ApiError;

/// The tenant the request was resolved to.
///
/// # Example
///
/// ```rust,ignore
/// async fn whoami(CurrentTenant(tenant): CurrentTenant) -> String {
///     tenant.name.clone()
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub Arc<Tenant>);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<Tenant>>()
            .cloned()
            .map(CurrentTenant)
            .ok_or_else(|| {
                tracing::error!("CurrentTenant extracted on a route without tenant middleware");
                ApiError::tenant_context_error()
            })
    }
}

impl Deref for CurrentTenant {
    type Target = Tenant;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The store session checked out for this request.
///
/// Released when the last clone drops, which is when the request ends unless
/// a handler moved it into a longer-lived task.
#[derive(Debug)]
pub struct RequestSession<S>(pub Arc<S>);

impl<S> Clone for RequestSession<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

#[async_trait]
impl<S, St> FromRequestParts<St> for RequestSession<S>
where
    S: Send + Sync + 'static,
    St: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Arc<S>>()
            .cloned()
            .map(RequestSession)
            .ok_or_else(|| {
                tracing::error!("RequestSession extracted on a route without tenant middleware");
                ApiError::internal_error("Request session unavailable")
            })
    }
}

impl<S> Deref for RequestSession<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
