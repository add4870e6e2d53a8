//! Middleware modules for the followup API
//!
//! - `tenant`: signature check, workspace resolution and tenant context
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/slack/commands", post(handler))
//!     // Tenant resolution wraps every route; whitelisted paths pass through
//!     .layer(middleware::from_fn_with_state(state.clone(), tenant_middleware::<D>))
//!     // Outermost: request span and metrics cover rejected requests too
//!     .layer(middleware::from_fn(observability_middleware))
//! ```

mod tenant;

pub use tenant::{
    is_whitelisted, tenant_middleware, TenantMiddlewareError, WHITELIST_PATHS, WHITELIST_PREFIXES,
};
