#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use followup_api::{create_router, AppConfig, AppState};
use followup_test_utils::{signing::SignedRequest, MockStorage};
use secrecy::SecretString;
use serde_json::Value;
use tower::ServiceExt;

pub const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

pub fn test_config() -> AppConfig {
    AppConfig {
        signing_secret: Some(SecretString::new(SECRET.into())),
        ..AppConfig::default()
    }
}

pub fn test_state(storage: MockStorage, config: AppConfig) -> AppState<MockStorage> {
    AppState::from_config(storage, config).expect("Failed to build app state")
}

pub fn test_app(storage: MockStorage, config: AppConfig) -> Router {
    create_router(test_state(storage, config))
}

pub fn post(uri: &str, signed: &SignedRequest) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in signed.headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(signed.body.clone()))
        .expect("Failed to build request")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request")
}

/// Send one request, returning the status and the body as JSON (or as a
/// JSON string when the body is not JSON).
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("Router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

pub fn slash_command(team_id: &str, text: &str, now: i64) -> SignedRequest {
    SignedRequest::form(
        SECRET,
        now,
        &[
            ("team_id", team_id),
            ("team_domain", "acme"),
            ("command", "/followup"),
            ("text", text),
            ("user_id", "U0001"),
            ("user_name", "ana"),
            ("channel_id", "C0001"),
        ],
    )
}
