//! Tenant Resolver
//!
//! Turns a raw inbound webhook into the external workspace id it belongs to.
//! Authenticity is checked before the body is inspected.

pub mod extract;
pub mod signature;

use axum::http::{header, HeaderMap};
use followup_core::ConfigError;
use thiserror::Error;

use crate::config::AppConfig;

pub use extract::{
    extract_team_id, form_field, url_verification_challenge, BodyKind, Extracted,
    ExtractionStrategy, JsonLocation,
};
pub use signature::{
    compute_signature, SignatureVerifier, SIGNATURE_HEADER, SLACK_SIGNATURE_HEADER,
    SLACK_TIMESTAMP_HEADER, TIMESTAMP_HEADER,
};

/// Why a request could not be attributed to a workspace.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Authentication failure: {reason}")]
    AuthenticationFailure { reason: String },

    #[error("Malformed request: {reason}")]
    MalformedRequest { reason: String },
}

/// Verifies and attributes inbound requests.
#[derive(Debug, Clone)]
pub struct TenantResolver {
    verifier: Option<SignatureVerifier>,
}

impl TenantResolver {
    pub fn new(verifier: SignatureVerifier) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    /// A resolver that accepts unsigned requests. Local development only.
    pub fn unverified() -> Self {
        Self { verifier: None }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        if !config.verify_signatures {
            tracing::warn!("Request signature verification is DISABLED");
            return Ok(Self::unverified());
        }
        let secret = config
            .signing_secret
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "FOLLOWUP_SIGNING_SECRET".to_string(),
            })?;
        Ok(Self::new(
            SignatureVerifier::new(secret).with_tolerance(config.signature_tolerance_secs),
        ))
    }

    pub fn is_verifying(&self) -> bool {
        self.verifier.is_some()
    }

    /// Check the request signature against the current time.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), ResolveError> {
        self.verify_at(headers, body, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(&self, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), ResolveError> {
        match &self.verifier {
            Some(verifier) => verifier.verify(headers, body, now),
            None => Ok(()),
        }
    }

    /// Extract the workspace id without checking the signature.
    pub fn extract(&self, headers: &HeaderMap, body: &[u8]) -> Result<Extracted, ResolveError> {
        extract_team_id(content_type(headers), body)
    }

    /// Verify, then extract.
    pub fn resolve(&self, headers: &HeaderMap, body: &[u8]) -> Result<Extracted, ResolveError> {
        self.resolve_at(headers, body, chrono::Utc::now().timestamp())
    }

    pub fn resolve_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: i64,
    ) -> Result<Extracted, ResolveError> {
        self.verify_at(headers, body, now)?;
        self.extract(headers, body)
    }
}

pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}
