//! Route Modules
//!
//! - `/health/*` - health checks (whitelisted)
//! - `/metrics` - Prometheus scrape endpoint (whitelisted)
//! - `/slack/*` - webhook endpoints, behind the tenant middleware

pub mod health;
pub mod slack;

use axum::{middleware::from_fn, middleware::from_fn_with_state, routing::get, Router};
use followup_storage::Database;
use tower_http::trace::TraceLayer;

use crate::middleware::tenant_middleware;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the full application router.
///
/// Layer order, outermost first: observability, HTTP tracing, tenant
/// resolution. Rejected requests are still counted and logged.
pub fn create_router<D: Database>(state: AppState<D>) -> Router {
    Router::new()
        .nest("/health", health::create_router::<D>())
        .route("/metrics", get(metrics_handler))
        .nest("/slack", slack::create_router::<D>())
        .layer(from_fn_with_state(state.clone(), tenant_middleware::<D>))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(observability_middleware))
        .with_state(state)
}
