//! Error Types for the Followup API
//!
//! Every failure that reaches the top of a request becomes an [`ApiError`],
//! serialized as `{"code", "message", "details"?}` with the status code its
//! [`ErrorCode`] maps to. Conversions from the core error taxonomy log the
//! internal detail and return generic text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use followup_core::{ConfigError, ContextError, ScopeError, StorageError, TenantError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

use crate::resolver::ResolveError;
use crate::telemetry::metrics;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Request authenticity (400, 401, 413)
    // ========================================================================
    /// Signature missing, malformed, stale or wrong
    AuthenticationFailed,

    /// Body could not be decoded or carries no tenant identifier
    MalformedRequest,

    /// Request contains invalid input data
    InvalidInput,

    /// Body exceeds the configured limit
    PayloadTooLarge,

    // ========================================================================
    // Tenant access (403)
    // ========================================================================
    /// No tenant is installed for the workspace
    TenantNotFound,

    /// Tenant exists but its subscription does not permit access
    TenantSuspended,

    /// Resource belongs to another tenant
    AccessDenied,

    // ========================================================================
    // Client errors (404, 429)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    /// Tenant rate limit reached for this resource
    RateLimited,

    // ========================================================================
    // Server errors (500, 503)
    // ========================================================================
    /// Tenant context missing or misused inside the service
    TenantContextError,

    /// Internal server error
    InternalError,

    /// Database operation failed
    DatabaseError,

    /// Service is temporarily unavailable
    ServiceUnavailable,

    /// Database connection pool exhausted
    ConnectionPoolExhausted,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::AuthenticationFailed => StatusCode::UNAUTHORIZED,

            ErrorCode::MalformedRequest | ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,

            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,

            ErrorCode::TenantNotFound | ErrorCode::TenantSuspended | ErrorCode::AccessDenied => {
                StatusCode::FORBIDDEN
            }

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,

            ErrorCode::ServiceUnavailable | ErrorCode::ConnectionPoolExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            ErrorCode::TenantContextError
            | ErrorCode::InternalError
            | ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::AuthenticationFailed => "Request signature verification failed",
            ErrorCode::MalformedRequest => "Malformed request",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::PayloadTooLarge => "Request body too large",
            ErrorCode::TenantNotFound => "Workspace is not installed",
            ErrorCode::TenantSuspended => "Workspace subscription is not active",
            ErrorCode::AccessDenied => "Access denied",
            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::RateLimited => "Rate limit exceeded",
            ErrorCode::TenantContextError => "Tenant context unavailable",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::ConnectionPoolExhausted => "Connection pool exhausted",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn authentication_failed() -> Self {
        Self::from_code(ErrorCode::AuthenticationFailed)
    }

    pub fn malformed_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MalformedRequest, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn payload_too_large(limit_bytes: usize) -> Self {
        Self::new(
            ErrorCode::PayloadTooLarge,
            format!("Request body exceeds {} bytes", limit_bytes),
        )
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn access_denied() -> Self {
        Self::from_code(ErrorCode::AccessDenied)
    }

    /// Create a RateLimited error.
    pub fn rate_limited(resource: &str, retry_after_secs: Option<i64>) -> Self {
        let message = match retry_after_secs {
            Some(secs) => format!(
                "Rate limit exceeded for {}. Retry after {} seconds",
                resource, secs
            ),
            None => format!("Rate limit exceeded for {}", resource),
        };
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn tenant_context_error() -> Self {
        Self::from_code(ErrorCode::TenantContextError)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a DatabaseError.
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn connection_pool_exhausted() -> Self {
        Self::from_code(ErrorCode::ConnectionPoolExhausted)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::AuthenticationFailure { reason } => {
                tracing::warn!(reason, "Rejecting unauthenticated request");
                metrics::record_security_event("signature_rejected");
                ApiError::authentication_failed()
            }
            ResolveError::MalformedRequest { reason } => {
                tracing::warn!(reason, "Rejecting malformed request");
                ApiError::malformed_request(reason)
            }
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound { external_id } => ApiError::from_code(ErrorCode::TenantNotFound)
                .with_details(json!({ "external_id": external_id })),
            TenantError::Suspended {
                external_id,
                reason,
            } => ApiError::from_code(ErrorCode::TenantSuspended).with_details(json!({
                "external_id": external_id,
                "status": reason.as_str(),
            })),
            TenantError::Storage(e) => e.into(),
        }
    }
}

impl From<ContextError> for ApiError {
    fn from(err: ContextError) -> Self {
        tracing::error!("Tenant context error: {:?}", err);
        ApiError::tenant_context_error()
    }
}

impl From<ScopeError> for ApiError {
    fn from(err: ScopeError) -> Self {
        match err {
            ScopeError::Context(e) => e.into(),
            // Detail already logged on the security target by the scoped layer.
            ScopeError::AccessDenied { .. } => {
                metrics::record_security_event("access_denied");
                ApiError::access_denied()
            }
            ScopeError::TenantReassignment { .. } | ScopeError::Immutable { .. } => {
                tracing::error!("Refused scoped write: {}", err);
                ApiError::from_code(ErrorCode::InternalError)
            }
            ScopeError::Storage(e) => e.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind, id } => ApiError::entity_not_found(&kind.to_string(), id),
            other => {
                tracing::error!("Storage error: {:?}", other);
                ApiError::database_error("Database operation failed")
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!("Configuration error: {}", err);
        ApiError::internal_error("Service is misconfigured")
    }
}

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        ApiError::database_error("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!("Connection pool error: {:?}", err);

        match err {
            deadpool_postgres::PoolError::Timeout(_) => ApiError::connection_pool_exhausted(),
            deadpool_postgres::PoolError::Closed => {
                ApiError::service_unavailable("Database connection pool is closed")
            }
            _ => ApiError::database_error("Failed to acquire database connection"),
        }
    }
}

/// Convert from serde_json::Error to ApiError. The decoder's message stays
/// in the log.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::warn!(error = %err, "JSON decode error");
        ApiError::malformed_request("Invalid JSON payload")
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use followup_core::{EntityKind, SubscriptionStatus, SuspensionReason, TenantId};

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::AuthenticationFailed.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::MalformedRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::TenantNotFound.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::TenantSuspended.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ErrorCode::TenantContextError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::DatabaseError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_suspended_tenant_details_carry_status() {
        let err: ApiError = TenantError::Suspended {
            external_id: "T1".to_string(),
            reason: SuspensionReason::Status(SubscriptionStatus::Cancelled),
        }
        .into();
        assert_eq!(err.code, ErrorCode::TenantSuspended);
        assert_eq!(err.details, Some(json!({"external_id": "T1", "status": "cancelled"})));

        let err: ApiError = TenantError::Suspended {
            external_id: "T1".to_string(),
            reason: SuspensionReason::TrialExpired,
        }
        .into();
        assert_eq!(err.details.unwrap()["status"], json!("trial_expired"));
    }

    #[test]
    fn test_internal_details_stay_internal() {
        let err: ApiError = StorageError::Backend {
            reason: "relation \"tenants\" does not exist".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("tenants"));

        let err: ApiError = ContextError::NoTenant.into();
        assert_eq!(err.code, ErrorCode::TenantContextError);
        assert_eq!(err.message, "Tenant context unavailable");
    }

    #[test]
    fn test_scope_errors_map_to_codes() {
        let denied: ApiError = ScopeError::AccessDenied {
            kind: EntityKind::MeetingSession,
            resource_id: uuid::Uuid::nil(),
            owner: TenantId::now_v7(),
            current: TenantId::now_v7(),
        }
        .into();
        assert_eq!(denied.code, ErrorCode::AccessDenied);
        assert!(denied.details.is_none());

        let immutable: ApiError = ScopeError::Immutable {
            kind: EntityKind::AuditRecord,
        }
        .into();
        assert_eq!(immutable.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_resolve_errors_map_to_codes() {
        let err: ApiError = ResolveError::AuthenticationFailure {
            reason: "stale timestamp".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert!(!err.message.contains("stale"));

        let err: ApiError = ResolveError::MalformedRequest {
            reason: "no team id in body".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::rate_limited("slash_command", Some(42));
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("RATE_LIMITED"));
        assert!(json.contains("42"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_json_error_message_is_fixed() {
        let decode_err = serde_json::from_str::<serde_json::Value>("{\"team\": ").unwrap_err();
        let detail = decode_err.to_string();
        let err = ApiError::from(decode_err);

        assert_eq!(err.code, ErrorCode::MalformedRequest);
        assert_eq!(err.message, "Invalid JSON payload");
        assert!(!err.message.contains(&detail));
        assert!(err.details.is_none());
    }
}
