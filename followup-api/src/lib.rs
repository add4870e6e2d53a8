//! Followup API - Slack Webhook Surface
//!
//! Receives Slack slash commands, interactions and events, attributes each
//! request to its workspace tenant, and runs the handler inside that
//! tenant's context. Tenant data lives in PostgreSQL behind the scoped layer
//! of `followup-storage`.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod macros;
pub mod middleware;
pub mod resolver;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{DbClient, DbConfig, DbSession, PgEntity};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{CurrentTenant, RequestSession};
pub use middleware::{is_whitelisted, tenant_middleware, TenantMiddlewareError};
pub use resolver::{ResolveError, SignatureVerifier, TenantResolver};
pub use routes::create_router;
pub use state::{build_tenant_cache, AppState};
