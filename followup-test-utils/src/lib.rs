//! Followup Test Utilities
//!
//! Shared test infrastructure for the followup workspace:
//! - Proptest generators for tenants and installations
//! - Fixtures for common tenant states
//! - Request signing for webhook tests
//! - Cache backends that fail or stall on purpose
//! - Assertions for tenant isolation errors

// Re-export mock storage from its source crate
pub use followup_storage::MockStorage;

// Re-export core types for convenience
pub use followup_core::{
    EntityKind, Installation, PlanTier, ScopeError, StorageError, SubscriptionStatus,
    SuspensionReason, Tenant, TenantError, TenantId, Timestamp,
};

use chrono::{Duration as ChronoDuration, Utc};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenant-facing types.

    use super::*;
    use proptest::prelude::*;
    use proptest::sample::select;

    /// Generate a Slack-style workspace id such as `T04ABCD1234`.
    pub fn arb_external_id() -> impl Strategy<Value = String> {
        "T[A-Z0-9]{8,10}"
    }

    /// Generate a Slack-style user id.
    pub fn arb_user_id() -> impl Strategy<Value = String> {
        "U[A-Z0-9]{8,10}"
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_plan_tier() -> impl Strategy<Value = PlanTier> {
        select(PlanTier::ALL.to_vec())
    }

    pub fn arb_subscription_status() -> impl Strategy<Value = SubscriptionStatus> {
        select(SubscriptionStatus::ALL.to_vec())
    }

    pub fn arb_installation() -> impl Strategy<Value = Installation> {
        (
            arb_external_id(),
            "[a-z][a-z0-9-]{2,20}",
            proptest::option::of(arb_user_id()),
        )
            .prop_map(|(external_id, domain, installed_by)| Installation {
                name: format!("Workspace {domain}"),
                external_id,
                domain: Some(domain),
                installed_by_user_id: installed_by,
            })
    }

    /// Generate a tenant in any plan and status. Trial tenants get a trial
    /// end between a week in the past and a month in the future.
    pub fn arb_tenant() -> impl Strategy<Value = Tenant> {
        (
            arb_installation(),
            arb_plan_tier(),
            arb_subscription_status(),
            -7i64..30i64,
        )
            .prop_map(|(installation, plan, status, trial_days)| {
                let now = Utc::now();
                let mut tenant = Tenant::provisioned(installation, now);
                tenant.plan_tier = plan;
                tenant.subscription_status = status;
                tenant.trial_ends_at = match status {
                    SubscriptionStatus::Trial => Some(now + ChronoDuration::days(trial_days)),
                    _ => None,
                };
                tenant
            })
    }

    /// Generate a tenant that passes the access check.
    pub fn arb_accessible_tenant() -> impl Strategy<Value = Tenant> {
        arb_tenant().prop_filter("tenant must permit access", |t| {
            t.check_access(Utc::now()).is_ok()
        })
    }

    /// Generate arbitrary webhook body bytes.
    pub fn arb_body() -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(any::<u8>(), 0..512)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made tenants and seeded stores.

    use super::*;
    use followup_storage::TenantStore;

    pub fn installation(external_id: &str) -> Installation {
        Installation {
            external_id: external_id.to_string(),
            name: format!("Workspace {external_id}"),
            domain: Some(external_id.to_ascii_lowercase()),
            installed_by_user_id: Some("U0INSTALLER".to_string()),
        }
    }

    /// A paying tenant.
    pub fn active_tenant(external_id: &str) -> Tenant {
        let mut tenant = Tenant::provisioned(installation(external_id), Utc::now());
        tenant.plan_tier = PlanTier::Pro;
        tenant.subscription_status = SubscriptionStatus::Active;
        tenant.trial_ends_at = None;
        tenant
    }

    /// A trial tenant whose trial ends `days` from now (negative for expired).
    pub fn trial_tenant(external_id: &str, days: i64) -> Tenant {
        let now = Utc::now();
        let mut tenant = Tenant::provisioned(installation(external_id), now);
        tenant.trial_ends_at = Some(now + ChronoDuration::days(days));
        tenant
    }

    /// A tenant refused for `status`.
    pub fn tenant_with_status(external_id: &str, status: SubscriptionStatus) -> Tenant {
        let mut tenant = active_tenant(external_id);
        tenant.subscription_status = status;
        tenant
    }

    pub fn suspended_tenant(external_id: &str) -> Tenant {
        tenant_with_status(external_id, SubscriptionStatus::Suspended)
    }

    /// Insert `tenants` into a fresh store.
    pub async fn seeded_storage(tenants: &[Tenant]) -> Result<MockStorage, StorageError> {
        let storage = MockStorage::new();
        for tenant in tenants {
            storage.insert_tenant(tenant).await?;
        }
        Ok(storage)
    }
}

// ============================================================================
// REQUEST SIGNING
// ============================================================================

pub mod signing {
    //! Builds signed webhook requests the way Slack sends them.

    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use url::form_urlencoded;

    pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
    pub const SIGNATURE_HEADER: &str = "x-slack-signature";
    pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
    pub const JSON_CONTENT_TYPE: &str = "application/json";

    /// `"v0=" + hex(HMAC-SHA256(secret, "v0:" + timestamp + ":" + body))`.
    pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(b"v0:");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    pub fn form_body(pairs: &[(&str, &str)]) -> Vec<u8> {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
            .into_bytes()
    }

    /// Body plus the headers a signed webhook carries.
    #[derive(Debug, Clone)]
    pub struct SignedRequest {
        pub content_type: &'static str,
        pub timestamp: String,
        pub signature: String,
        pub body: Vec<u8>,
    }

    impl SignedRequest {
        pub fn new(
            secret: &str,
            timestamp: i64,
            content_type: &'static str,
            body: impl Into<Vec<u8>>,
        ) -> Self {
            let body = body.into();
            let timestamp = timestamp.to_string();
            Self {
                content_type,
                signature: sign(secret, &timestamp, &body),
                timestamp,
                body,
            }
        }

        pub fn form(secret: &str, timestamp: i64, pairs: &[(&str, &str)]) -> Self {
            Self::new(secret, timestamp, FORM_CONTENT_TYPE, form_body(pairs))
        }

        pub fn json(secret: &str, timestamp: i64, body: &str) -> Self {
            Self::new(secret, timestamp, JSON_CONTENT_TYPE, body.as_bytes().to_vec())
        }

        /// Swap the body after signing.
        pub fn tampered(mut self, body: impl Into<Vec<u8>>) -> Self {
            self.body = body.into();
            self
        }

        pub fn headers(&self) -> [(&'static str, String); 3] {
            [
                ("content-type", self.content_type.to_string()),
                (TIMESTAMP_HEADER, self.timestamp.clone()),
                (SIGNATURE_HEADER, self.signature.clone()),
            ]
        }
    }

    /// Current unix time in seconds.
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

// ============================================================================
// CACHE BACKENDS
// ============================================================================

pub mod backends {
    //! Cache backends for degradation tests.

    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use followup_core::CacheError;
    use followup_storage::{CacheBackend, CacheResult, CacheStats, InMemoryCacheBackend};

    fn unavailable() -> CacheError {
        CacheError::Unavailable {
            reason: "connection refused".to_string(),
        }
    }

    /// Fails every call, stats included.
    #[derive(Debug, Default)]
    pub struct UnavailableCache {
        calls: AtomicU64,
    }

    impl UnavailableCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> CacheResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(unavailable())
        }
    }

    #[async_trait]
    impl CacheBackend for UnavailableCache {
        fn name(&self) -> &'static str {
            "unavailable"
        }
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            self.fail()
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
            self.fail()
        }
        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            self.fail()
        }
        async fn delete_prefix(&self, _prefix: &str) -> CacheResult<u64> {
            self.fail()
        }
        async fn stats(&self) -> CacheResult<CacheStats> {
            self.fail()
        }
    }

    /// An in-memory cache that sleeps before every call.
    pub struct SlowCache {
        inner: InMemoryCacheBackend,
        delay: Duration,
    }

    impl SlowCache {
        pub fn new(delay: Duration) -> Self {
            Self {
                inner: InMemoryCacheBackend::new(),
                delay,
            }
        }
    }

    #[async_trait]
    impl CacheBackend for SlowCache {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> CacheResult<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete(key).await
        }
        async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
            tokio::time::sleep(self.delay).await;
            self.inner.delete_prefix(prefix).await
        }
        async fn stats(&self) -> CacheResult<CacheStats> {
            tokio::time::sleep(self.delay).await;
            self.inner.stats().await
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for tenant isolation outcomes.

    use super::*;

    /// Assert that a scoped operation was refused for crossing tenants.
    pub fn assert_access_denied<T: std::fmt::Debug>(result: &Result<T, ScopeError>) {
        assert!(
            matches!(result, Err(ScopeError::AccessDenied { .. })),
            "Expected AccessDenied, got {:?}",
            result
        );
    }

    /// Assert that a scoped operation failed for lack of tenant context.
    pub fn assert_no_context<T: std::fmt::Debug>(result: &Result<T, ScopeError>) {
        assert!(
            matches!(result, Err(ScopeError::Context(_))),
            "Expected a context error, got {:?}",
            result
        );
    }

    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, ScopeError>, kind: EntityKind) {
        match result {
            Err(ScopeError::Storage(StorageError::NotFound { kind: found, .. })) => {
                assert_eq!(*found, kind, "Expected NotFound for {:?}", kind);
            }
            other => panic!("Expected NotFound for {:?}, got {:?}", kind, other),
        }
    }

    pub fn assert_suspended<T: std::fmt::Debug>(
        result: &Result<T, TenantError>,
        expected: SuspensionReason,
    ) {
        match result {
            Err(TenantError::Suspended { reason, .. }) => assert_eq!(*reason, expected),
            other => panic!("Expected Suspended({}), got {:?}", expected, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_generated_external_ids_look_like_slack(id in generators::arb_external_id()) {
            prop_assert!(id.starts_with('T'));
            prop_assert!(id.len() >= 9 && id.len() <= 11);
        }

        #[test]
        fn prop_accessible_tenants_pass_access_check(tenant in generators::arb_accessible_tenant()) {
            prop_assert!(tenant.subscription_status.permits_access());
        }
    }

    #[test]
    fn test_fixture_states() {
        assert!(fixtures::active_tenant("T1").check_access(Utc::now()).is_ok());
        assert!(fixtures::trial_tenant("T1", 3).check_access(Utc::now()).is_ok());
        assert_eq!(
            fixtures::trial_tenant("T1", -1).check_access(Utc::now()),
            Err(SuspensionReason::TrialExpired)
        );
        assert_eq!(
            fixtures::suspended_tenant("T1").check_access(Utc::now()),
            Err(SuspensionReason::Status(SubscriptionStatus::Suspended))
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = signing::sign("secret", "1700000000", b"team_id=T1");
        let b = signing::sign("secret", "1700000000", b"team_id=T1");
        let c = signing::sign("other", "1700000000", b"team_id=T1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("v0="));
        assert_eq!(a.len(), 3 + 64);
    }

    #[test]
    fn test_signed_form_request() {
        let req = signing::SignedRequest::form("s", 42, &[("team_id", "T1"), ("text", "a b")]);
        assert_eq!(req.body, b"team_id=T1&text=a+b".to_vec());
        assert_eq!(req.timestamp, "42");
        assert_eq!(req.signature, signing::sign("s", "42", &req.body));
    }

    #[tokio::test]
    async fn test_unavailable_cache_counts_calls() {
        use followup_storage::CacheBackend;

        let cache = backends::UnavailableCache::new();
        assert!(cache.get("k").await.is_err());
        assert!(cache.stats().await.is_err());
        assert_eq!(cache.calls(), 2);
    }
}
