//! Tenant Middleware Tests
//!
//! Every webhook is authenticated, attributed to exactly one workspace and
//! refused unless that workspace is installed and paid up. Whitelisted paths
//! skip all of it.

mod test_support;

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use followup_api::{AppState, TenantResolver};
use followup_core::{MeetingSession, SubscriptionStatus, User};
use followup_storage::{context, scoped_query, TenantCache, TenantCacheConfig, TenantStore};
use followup_test_utils::{
    backends::UnavailableCache,
    fixtures,
    generators::arb_external_id,
    signing::{self, SignedRequest},
    MockStorage,
};
use proptest::prelude::*;
use serde_json::json;
use test_support::*;

async fn seeded(tenants: &[followup_core::Tenant]) -> MockStorage {
    fixtures::seeded_storage(tenants)
        .await
        .expect("Failed to seed storage")
}

fn events_body(team_id: &str) -> String {
    json!({
        "team_id": team_id,
        "type": "event_callback",
        "event": { "type": "app_mention", "text": "hi" }
    })
    .to_string()
}

// ============================================================================
// REJECTIONS
// ============================================================================

#[tokio::test]
async fn test_unsigned_request_is_unauthorized() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let app = test_app(storage.clone(), test_config());

    let mut signed = slash_command("T1", "", signing::now());
    signed.signature = String::new();
    let (status, body) = send(app, post("/slack/commands", &signed)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTHENTICATION_FAILED");
    assert_eq!(storage.sessions_opened(), 0);
}

#[tokio::test]
async fn test_wrong_secret_is_unauthorized() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let app = test_app(storage, test_config());

    let signed = SignedRequest::form("not-the-secret", signing::now(), &[("team_id", "T1")]);
    let (status, _) = send(app, post("/slack/commands", &signed)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tampered_body_is_unauthorized() {
    let storage = seeded(&[fixtures::active_tenant("T1"), fixtures::active_tenant("T2")]).await;
    let app = test_app(storage, test_config());

    let signed = slash_command("T1", "", signing::now())
        .tampered(signing::form_body(&[("team_id", "T2"), ("command", "/followup")]));
    let (status, _) = send(app, post("/slack/commands", &signed)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_and_future_timestamps() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let now = signing::now();

    let cases = [
        (now - 299, StatusCode::OK),
        (now + 299, StatusCode::OK),
        (now - 301, StatusCode::UNAUTHORIZED),
        (now + 301, StatusCode::UNAUTHORIZED),
    ];
    for (signed_at, expected) in cases {
        let app = test_app(storage.clone(), test_config());
        let signed = SignedRequest::json(SECRET, signed_at, &events_body("T1"));
        let (status, _) = send(app, post("/slack/events", &signed)).await;
        assert_eq!(status, expected, "signed at now{:+}", signed_at - now);
    }
}

#[test]
fn test_tolerance_boundary_is_inclusive() {
    let resolver = TenantResolver::from_config(&test_config()).expect("resolver");
    let now = 1_700_000_000;
    let body = events_body("T1");

    for (signed_at, ok) in [(now - 300, true), (now + 300, true), (now - 301, false)] {
        let signed = SignedRequest::json(SECRET, signed_at, &body);
        let mut headers = HeaderMap::new();
        for (name, value) in signed.headers() {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).expect("header value"),
            );
        }
        assert_eq!(
            resolver.verify_at(&headers, &signed.body, now).is_ok(),
            ok,
            "signed at now{:+}",
            signed_at - now
        );
    }
}

#[tokio::test]
async fn test_missing_team_id_is_bad_request() {
    let storage = seeded(&[]).await;
    let app = test_app(storage.clone(), test_config());

    let signed = SignedRequest::form(SECRET, signing::now(), &[("command", "/followup")]);
    let (status, body) = send(app, post("/slack/commands", &signed)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MALFORMED_REQUEST");
    assert_eq!(storage.sessions_opened(), 0);
}

#[tokio::test]
async fn test_unknown_workspace_is_forbidden() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let app = test_app(storage.clone(), test_config());

    let signed = slash_command("T404", "", signing::now());
    let (status, body) = send(app, post("/slack/commands", &signed)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "TENANT_NOT_FOUND");
    assert_eq!(storage.tenant_count(), 1);
}

#[tokio::test]
async fn test_refused_subscriptions_are_forbidden() {
    let tenants = vec![
        fixtures::tenant_with_status("TSUS", SubscriptionStatus::Suspended),
        fixtures::tenant_with_status("TCAN", SubscriptionStatus::Cancelled),
        fixtures::trial_tenant("TEXP", -1),
    ];
    let storage = seeded(&tenants).await;

    for tenant in &tenants {
        let app = test_app(storage.clone(), test_config());
        let signed = slash_command(&tenant.external_id, "", signing::now());
        let (status, body) = send(app, post("/slack/commands", &signed)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", tenant.external_id);
        assert_eq!(body["code"], "TENANT_SUSPENDED");
    }
    assert_eq!(storage.user_count(), 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let config = followup_api::AppConfig {
        body_limit_bytes: 64,
        ..test_config()
    };
    let app = test_app(storage, config);

    let padding = "x".repeat(256);
    let signed = slash_command("T1", &padding, signing::now());
    let (status, body) = send(app, post("/slack/commands", &signed)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

// ============================================================================
// WHITELIST
// ============================================================================

#[tokio::test]
async fn test_whitelisted_paths_skip_resolution() {
    let storage = seeded(&[]).await;

    let (status, body) = send(test_app(storage.clone(), test_config()), get("/health/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "pong");

    let (status, body) = send(test_app(storage.clone(), test_config()), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(test_app(storage.clone(), test_config()), get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(storage.sessions_opened(), 0);
}

#[tokio::test]
async fn test_extra_whitelist_entries() {
    let storage = seeded(&[]).await;
    let config = followup_api::AppConfig {
        extra_whitelist: vec!["/slack/events".to_string()],
        ..test_config()
    };

    // Whitelisted but unrouted for GET: reaches the router, not the resolver.
    let (status, _) = send(test_app(storage, config), get("/slack/events")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[tokio::test]
async fn test_url_verification_answered_after_signature_check() {
    let storage = seeded(&[]).await;
    let body = json!({ "type": "url_verification", "challenge": "3eZbrw1aB", "token": "x" }).to_string();

    let signed = SignedRequest::json(SECRET, signing::now(), &body);
    let (status, response) = send(test_app(storage.clone(), test_config()), post("/slack/events", &signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({ "challenge": "3eZbrw1aB" }));

    let forged = SignedRequest::json("forged", signing::now(), &body);
    let (status, _) = send(test_app(storage, test_config()), post("/slack/events", &forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_direct_team_id_wins_over_payload() {
    let t1 = fixtures::active_tenant("T1");
    let t2 = fixtures::active_tenant("T2");
    let storage = seeded(&[t1.clone(), t2.clone()]).await;

    let payload = json!({
        "type": "block_actions",
        "team": { "id": "T2" },
        "user": { "id": "U0001", "username": "ana" },
        "actions": []
    })
    .to_string();
    let signed = SignedRequest::form(SECRET, signing::now(), &[("team_id", "T1"), ("payload", &payload)]);
    let (status, _) = send(test_app(storage.clone(), test_config()), post("/slack/interactions", &signed)).await;
    assert_eq!(status, StatusCode::OK);

    let in_t1 = context::with_tenant(Arc::new(t1), async {
        scoped_query::<User, _>(&storage)?.count().await
    })
    .await
    .expect("context")
    .expect("query");
    let in_t2 = context::with_tenant(Arc::new(t2), async {
        scoped_query::<User, _>(&storage)?.count().await
    })
    .await
    .expect("context")
    .expect("query");
    assert_eq!((in_t1, in_t2), (1, 0));
}

#[tokio::test]
async fn test_context_cleared_after_request() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let signed = SignedRequest::json(SECRET, signing::now(), &events_body("T1"));

    let (status, _) = send(test_app(storage, test_config()), post("/slack/events", &signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(context::get_optional().is_none());
}

#[tokio::test]
async fn test_each_resolution_is_audited() {
    let tenant = fixtures::active_tenant("T1");
    let storage = seeded(&[tenant.clone()]).await;
    let state = test_state(storage.clone(), test_config());

    for _ in 0..2 {
        let signed = SignedRequest::json(SECRET, signing::now(), &events_body("T1"));
        let (status, _) = send(followup_api::create_router(state.clone()), post("/slack/events", &signed)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let accesses: Vec<_> = storage
        .audit_records()
        .into_iter()
        .filter(|r| r.event_type == "tenant.accessed")
        .collect();
    assert_eq!(accesses.len(), 2);
    assert!(accesses.iter().all(|r| r.tenant_id == tenant.id));
    assert_eq!(accesses[0].metadata["source"], "database");
    assert_eq!(accesses[1].metadata["source"], "cache");
}

#[tokio::test]
async fn test_unavailable_cache_degrades_to_store() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let config = test_config();
    let backend = Arc::new(UnavailableCache::new());
    let cache = TenantCache::new(backend.clone(), TenantCacheConfig::default());
    let resolver = TenantResolver::from_config(&config).expect("resolver");
    let state = AppState::new(storage.clone(), cache, resolver, config);

    let signed = SignedRequest::json(SECRET, signing::now(), &events_body("T1"));
    let (status, _) = send(followup_api::create_router(state.clone()), post("/slack/events", &signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(backend.calls() > 0);

    let (status, body) = send(followup_api::create_router(state), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["details"]["cache"]["status"], "degraded");
}

#[tokio::test]
async fn test_auto_provision_creates_trial_tenant() {
    let storage = seeded(&[]).await;
    let config = followup_api::AppConfig {
        auto_provision: true,
        ..test_config()
    };

    let signed = slash_command("TNEW", "", signing::now());
    let (status, body) = send(test_app(storage.clone(), config), post("/slack/commands", &signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response_type"], "ephemeral");

    let tenant = storage
        .tenant_by_external_id("TNEW")
        .await
        .expect("lookup")
        .expect("tenant was provisioned");
    assert_eq!(tenant.subscription_status, SubscriptionStatus::Trial);
    assert_eq!(tenant.domain.as_deref(), Some("acme"));
    assert_eq!(tenant.installed_by_user_id.as_deref(), Some("U0001"));
    assert_eq!(storage.tenant_count(), 1);
}

// ============================================================================
// HANDLERS BEHIND THE MIDDLEWARE
// ============================================================================

#[tokio::test]
async fn test_slash_command_rate_limit() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let config = followup_api::AppConfig {
        slash_command_limit: 2,
        ..test_config()
    };
    let state = test_state(storage, config);

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let signed = slash_command("T1", "", signing::now());
        let (status, body) = send(followup_api::create_router(state.clone()), post("/slack/commands", &signed)).await;
        if status == StatusCode::TOO_MANY_REQUESTS {
            assert_eq!(body["code"], "RATE_LIMITED");
        }
        statuses.push(status);
    }
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
}

#[tokio::test]
async fn test_rate_limits_are_per_tenant() {
    let storage = seeded(&[fixtures::active_tenant("T1"), fixtures::active_tenant("T2")]).await;
    let config = followup_api::AppConfig {
        slash_command_limit: 1,
        ..test_config()
    };
    let state = test_state(storage, config);

    for team in ["T1", "T2"] {
        let signed = slash_command(team, "", signing::now());
        let (status, _) = send(followup_api::create_router(state.clone()), post("/slack/commands", &signed)).await;
        assert_eq!(status, StatusCode::OK, "{team}");
    }
}

#[tokio::test]
async fn test_background_job_opens_session_in_tenant() {
    let tenant = fixtures::active_tenant("T1");
    let other = fixtures::active_tenant("T2");
    let storage = seeded(&[tenant.clone(), other.clone()]).await;

    let signed = slash_command("T1", "rec-42", signing::now());
    let (status, body) = send(test_app(storage.clone(), test_config()), post("/slack/commands", &signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "⏳ Preparing follow-up for recording rec-42...");

    let tenant = Arc::new(tenant);
    let mut sessions = Vec::new();
    for _ in 0..50 {
        sessions = context::with_tenant(Arc::clone(&tenant), async {
            scoped_query::<MeetingSession, _>(&storage)?.all().await
        })
        .await
        .expect("context")
        .expect("query");
        if !sessions.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].recording_id, "rec-42");

    let leaked = context::with_tenant(Arc::new(other), async {
        scoped_query::<MeetingSession, _>(&storage)?.count().await
    })
    .await
    .expect("context")
    .expect("query");
    assert_eq!(leaked, 0);
}

#[tokio::test]
async fn test_unknown_slash_command_is_acknowledged() {
    let storage = seeded(&[fixtures::active_tenant("T1")]).await;
    let signed = SignedRequest::form(
        SECRET,
        signing::now(),
        &[("team_id", "T1"), ("command", "/weather"), ("user_id", "U1")],
    );
    let (status, body) = send(test_app(storage, test_config()), post("/slack/commands", &signed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Unknown command: /weather");
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any installed workspace resolves with a valid signature and is
    /// refused without one.
    #[test]
    fn prop_signed_requests_resolve_installed_workspaces(
        external_id in arb_external_id(),
        forge in any::<bool>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = seeded(&[fixtures::active_tenant(&external_id)]).await;
            let secret = if forge { "forged-secret" } else { SECRET };
            let signed = SignedRequest::json(secret, signing::now(), &events_body(&external_id));

            let (status, _) = send(test_app(storage, test_config()), post("/slack/events", &signed)).await;
            let expected = if forge { StatusCode::UNAUTHORIZED } else { StatusCode::OK };
            prop_assert_eq!(status, expected);
            Ok(())
        })?;
    }
}
