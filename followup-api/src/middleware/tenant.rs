//! Axum Middleware for Tenant Resolution
//!
//! For every non-whitelisted request this middleware:
//! - Buffers the body up to the configured limit (413 beyond it)
//! - Verifies the request signature (401 on failure)
//! - Answers URL verification handshakes on `/slack/events`
//! - Extracts the workspace id (400 when there is none)
//! - Checks out a store session and loads the tenant through the cache
//!   (403 when unknown or suspended)
//! - Injects `Arc<Tenant>` and the session into request extensions
//! - Runs the rest of the request inside the tenant context and a `tenant`
//!   span, so the context is gone once the response is produced

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use followup_core::{Installation, TenantError};
use followup_storage::{context, Database, LoadSource, ResolvedTenant};
use serde_json::json;
use tracing::{info_span, Instrument};

use crate::error::{ApiError, ApiResult};
use crate::resolver::{content_type, form_field, url_verification_challenge, BodyKind};
use crate::state::AppState;
use crate::telemetry::metrics;

/// Paths served without tenant resolution. Subpaths match too.
pub const WHITELIST_PATHS: &[&str] = &[
    "/health",
    "/metrics",
    "/favicon.ico",
    "/robots.txt",
    "/_health",
    "/_status",
];

pub const WHITELIST_PREFIXES: &[&str] = &["/static/", "/assets/", "/public/"];

const EVENTS_PATH: &str = "/slack/events";

/// Whether `path` bypasses tenant resolution.
pub fn is_whitelisted(path: &str, extra: &[String]) -> bool {
    let matches_entry = |entry: &str| {
        path == entry
            || path
                .strip_prefix(entry)
                .is_some_and(|rest| rest.starts_with('/'))
    };

    WHITELIST_PATHS.iter().any(|entry| matches_entry(entry))
        || WHITELIST_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
        || extra.iter().any(|entry| matches_entry(entry))
}

/// Axum middleware that resolves the tenant and scopes the request to it.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .route("/slack/commands", post(slash_command::<DbClient>))
///     .layer(middleware::from_fn_with_state(state.clone(), tenant_middleware::<DbClient>))
///     .with_state(state);
/// ```
pub async fn tenant_middleware<D: Database>(
    State(state): State<AppState<D>>,
    request: Request,
    next: Next,
) -> Result<Response, TenantMiddlewareError> {
    if is_whitelisted(request.uri().path(), &state.config.extra_whitelist) {
        return Ok(next.run(request).await);
    }

    resolve_and_run(&state, request, next)
        .await
        .map_err(TenantMiddlewareError)
}

async fn resolve_and_run<D: Database>(
    state: &AppState<D>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    let limit = state.config.body_limit_bytes;
    let (mut parts, body) = request.into_parts();
    let bytes = buffer_body(&parts, body, limit).await?;

    state.resolver.verify(&parts.headers, &bytes)?;

    if parts.uri.path() == EVENTS_PATH {
        if let Some(challenge) = url_verification_challenge(content_type(&parts.headers), &bytes) {
            tracing::info!("Answering URL verification handshake");
            return Ok(Json(json!({ "challenge": challenge })).into_response());
        }
    }

    let extracted = state.resolver.extract(&parts.headers, &bytes)?;
    tracing::debug!(
        external_id = %extracted.team_id,
        strategy = %extracted.strategy.describe(),
        "workspace id extracted"
    );

    let session = Arc::new(state.db.session().await?);
    let resolved = match load_tenant(state, &parts, &bytes, &extracted.team_id, &*session).await {
        Ok(resolved) => resolved,
        Err(e) => {
            let outcome = match &e {
                TenantError::NotFound { .. } => "not_found",
                TenantError::Suspended { .. } => "suspended",
                TenantError::Storage(_) => "error",
            };
            metrics::record_tenant_resolution("none", outcome);
            return Err(e.into());
        }
    };

    let tenant = resolved.tenant;
    metrics::record_tenant_resolution(resolved.source, "resolved");

    parts.extensions.insert(Arc::clone(&tenant));
    parts.extensions.insert(session);
    let request = Request::from_parts(parts, Body::from(bytes));

    let span = info_span!(
        "tenant",
        tenant_id = %tenant.id,
        external_id = %tenant.external_id,
        source = resolved.source,
    );
    let response = context::with_tenant(tenant, next.run(request).instrument(span)).await?;
    Ok(response)
}

struct Resolution {
    tenant: Arc<followup_core::Tenant>,
    source: &'static str,
}

async fn load_tenant<D: Database>(
    state: &AppState<D>,
    parts: &Parts,
    body: &[u8],
    external_id: &str,
    session: &D::Session,
) -> Result<Resolution, TenantError> {
    match state.cache.get_or_load(external_id, session).await {
        Ok(ResolvedTenant { tenant, source }) => Ok(Resolution {
            tenant,
            source: source.as_str(),
        }),
        Err(TenantError::NotFound { .. }) if state.config.auto_provision => {
            let installation = installation_from_request(parts, body, external_id);
            let provisioned = state.cache.provision(session, installation).await?;
            if !provisioned.created {
                // Lost a race with a concurrent installation; go through the
                // normal path so suspension rules still apply.
                let resolved = state.cache.get_or_load(external_id, session).await?;
                return Ok(Resolution {
                    tenant: resolved.tenant,
                    source: LoadSource::Database.as_str(),
                });
            }
            Ok(Resolution {
                tenant: Arc::new(provisioned.tenant),
                source: "provisioned",
            })
        }
        Err(e) => Err(e),
    }
}

fn installation_from_request(parts: &Parts, body: &[u8], external_id: &str) -> Installation {
    let is_form = BodyKind::from_content_type(content_type(&parts.headers)) == Some(BodyKind::Form);
    let field = |name: &str| {
        if is_form {
            form_field(body, name).filter(|v| !v.trim().is_empty())
        } else {
            None
        }
    };

    let domain = field("team_domain");
    Installation {
        external_id: external_id.to_string(),
        name: domain.clone().unwrap_or_else(|| external_id.to_string()),
        domain,
        installed_by_user_id: field("user_id"),
    }
}

async fn buffer_body(parts: &Parts, body: Body, limit: usize) -> ApiResult<Bytes> {
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::payload_too_large(limit));
    }

    axum::body::to_bytes(body, limit).await.map_err(|e| {
        tracing::warn!(error = %e, limit, "Request body rejected");
        ApiError::payload_too_large(limit)
    })
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct TenantMiddlewareError(pub ApiError);

impl IntoResponse for TenantMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

impl From<ApiError> for TenantMiddlewareError {
    fn from(error: ApiError) -> Self {
        Self(error)
    }
}
