//! Request signature verification.
//!
//! Signatures are `"v0=" + hex(HMAC-SHA256(secret, "v0:" + timestamp + ":" + body))`,
//! carried in a signature header next to the signing timestamp. The
//! timestamp is hashed exactly as it appears in the header.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use super::ResolveError;
use crate::config::DEFAULT_SIGNATURE_TOLERANCE_SECS;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-request-timestamp";
pub const SIGNATURE_HEADER: &str = "x-request-signature";

/// Slack's own header names, read when the primary names are absent.
pub const SLACK_TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
pub const SLACK_SIGNATURE_HEADER: &str = "x-slack-signature";

const SIGNATURE_VERSION: &str = "v0";

/// Compute the signature header value for `body` signed at `timestamp`.
pub fn compute_signature(secret: &[u8], timestamp: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(SIGNATURE_VERSION.as_bytes());
    mac.update(b":");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("{}={}", SIGNATURE_VERSION, hex::encode(mac.finalize().into_bytes()))
}

/// Checks request signatures against the shared signing secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn tolerance_secs(&self) -> i64 {
        self.tolerance_secs
    }

    /// Verify `body` against the signature headers, with `now` as the
    /// server time in unix seconds.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), ResolveError> {
        let timestamp = header(headers, TIMESTAMP_HEADER, SLACK_TIMESTAMP_HEADER)
            .ok_or_else(|| failure("missing timestamp header"))?;
        let signature = header(headers, SIGNATURE_HEADER, SLACK_SIGNATURE_HEADER)
            .ok_or_else(|| failure("missing signature header"))?;

        let signed_at = timestamp
            .trim()
            .parse::<i64>()
            .map_err(|_| failure("timestamp is not numeric"))?;
        let skew = now.saturating_sub(signed_at).saturating_abs();
        if skew > self.tolerance_secs {
            return Err(failure(format!("timestamp outside tolerance by {}s", skew)));
        }

        let signature_hex = signature
            .strip_prefix("v0=")
            .ok_or_else(|| failure("unsupported signature version"))?;
        let expected = hex::decode(signature_hex).map_err(|_| failure("signature is not hex"))?;

        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| failure("unusable signing secret"))?;
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);

        mac.verify_slice(&expected)
            .map_err(|_| failure("signature mismatch"))
    }
}

fn header<'a>(headers: &'a HeaderMap, primary: &str, alias: &str) -> Option<&'a str> {
    headers
        .get(primary)
        .or_else(|| headers.get(alias))
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn failure(reason: impl Into<String>) -> ResolveError {
    ResolveError::AuthenticationFailure {
        reason: reason.into(),
    }
}
