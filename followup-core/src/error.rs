//! Error types for followup operations

use crate::{EntityId, EntityKind, SuspensionReason, TenantId};
use std::time::Duration;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {kind} with id {id}")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("Insert failed for {kind}: {reason}")]
    InsertFailed { kind: EntityKind, reason: String },

    #[error("Unique constraint violated for {kind}: {detail}")]
    UniqueViolation { kind: EntityKind, detail: String },

    #[error("Update failed for {kind} with id {id}: {reason}")]
    UpdateFailed {
        kind: EntityKind,
        id: EntityId,
        reason: String,
    },

    #[error("Row decode failed for {kind}: {reason}")]
    Decode { kind: EntityKind, reason: String },

    #[error("Storage backend error: {reason}")]
    Backend { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Misuse of the per-task tenant slot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("No tenant is set in the current context")]
    NoTenant,

    #[error("Tenant context accessed outside of a tenant scope")]
    NoScope,

    #[error("Refusing to place invalid tenant in context: {reason}")]
    InvalidTenant { reason: String },
}

/// Failures of tenant-scoped reads and writes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("Access denied: {kind} {resource_id} belongs to tenant {owner}, current tenant is {current}")]
    AccessDenied {
        kind: EntityKind,
        resource_id: EntityId,
        owner: TenantId,
        current: TenantId,
    },

    #[error("Tenant reference of {kind} {resource_id} cannot change from {from} to {to}")]
    TenantReassignment {
        kind: EntityKind,
        resource_id: EntityId,
        from: TenantId,
        to: TenantId,
    },

    #[error("{kind} records are immutable and cannot be deleted")]
    Immutable { kind: EntityKind },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of tenant resolution that stops the request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TenantError {
    #[error("No tenant is installed for workspace {external_id}")]
    NotFound { external_id: String },

    #[error("Workspace {external_id} is suspended: {reason}")]
    Suspended {
        external_id: String,
        reason: SuspensionReason,
    },

    #[error("Tenant lookup failed: {0}")]
    Storage(#[from] StorageError),
}

/// Cache backend failures. Never surfaced to clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache operation {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("Cache entry could not be (de)serialized: {reason}")]
    Serialization { reason: String },

    #[error("Cache backend error: {reason}")]
    Backend { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("CRM provider {provider} is not supported")]
    ProviderNotSupported { provider: String },

    #[error("CRM provider {provider} is unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },
}

/// Master error type for all followup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FollowupError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    #[error("Scope error: {0}")]
    Scope(#[from] ScopeError),

    #[error("Tenant error: {0}")]
    Tenant(#[from] TenantError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for followup operations.
pub type FollowupResult<T> = Result<T, FollowupError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for scoped operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

// =============================================================================
// TESTS
// =============================================================================
