//! Slack Webhook Endpoints
//!
//! - POST /slack/commands - slash commands (`/followup`, `/meetings`)
//! - POST /slack/interactions - block actions from interactive messages
//! - POST /slack/events - Events API callbacks
//!
//! All three run behind the tenant middleware: by the time a handler runs,
//! the signature has been checked and the tenant context is established.

use axum::{extract::State, routing::post, Form, Json, Router};
use followup_core::{EntityId, LimitPeriod, MeetingSession, ProcessingStatus};
use followup_storage::{context, Database};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::extractors::{CurrentTenant, RequestSession};
use crate::services::{self, Interaction, RateDecision, SLASH_COMMAND_RESOURCE};
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Form fields of a slash command invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct SlashCommand {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub response_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionForm {
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: InteractionUser,
    #[serde(default)]
    pub actions: Vec<BlockAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionUser {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockAction {
    pub action_id: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Immediate reply shown only to the invoking user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EphemeralMessage {
    pub response_type: &'static str,
    pub text: String,
}

impl EphemeralMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            response_type: "ephemeral",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: EntityId,
    pub recording_id: String,
    pub processing_status: ProcessingStatus,
}

impl From<&MeetingSession> for SessionSummary {
    fn from(session: &MeetingSession) -> Self {
        Self {
            id: session.id,
            recording_id: session.recording_id.clone(),
            processing_status: session.processing_status,
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// POST /slack/commands
///
/// Acknowledges immediately. With a recording id in the command text, a
/// pending meeting session is opened by a background task that carries its
/// own tenant context and store session.
pub async fn slash_command<D: Database>(
    State(state): State<AppState<D>>,
    CurrentTenant(tenant): CurrentTenant,
    RequestSession(session): RequestSession<D::Session>,
    Form(command): Form<SlashCommand>,
) -> ApiResult<Json<EphemeralMessage>> {
    if !matches!(command.command.as_str(), "/followup" | "/meetings") {
        return Ok(Json(EphemeralMessage::new(format!(
            "Unknown command: {}",
            command.command
        ))));
    }

    let (user, _) = services::record_interaction(
        &*session,
        Interaction {
            external_user_id: command.user_id.clone(),
            username: command.user_name.clone(),
        },
    )
    .await?;

    let decision = services::check_and_increment(
        &*session,
        SLASH_COMMAND_RESOURCE,
        LimitPeriod::Hourly,
        state.config.slash_command_limit,
    )
    .await?;
    if let RateDecision::Refused { retry_after_secs } = decision {
        return Err(ApiError::rate_limited(
            SLASH_COMMAND_RESOURCE,
            Some(retry_after_secs),
        ));
    }

    let recording_id = command.text.trim();
    if recording_id.is_empty() {
        return Ok(Json(EphemeralMessage::new("⏳ Loading today's meetings...")));
    }

    let db = state.db.clone();
    let user_id = user.id;
    let job_recording = recording_id.to_string();
    let _detached = context::spawn_with_tenant(tenant, async move {
        if let Err(e) = open_meeting_job(db, user_id, job_recording).await {
            tracing::warn!(error = %e.message, "meeting session job failed");
        }
    })?;

    Ok(Json(EphemeralMessage::new(format!(
        "⏳ Preparing follow-up for recording {}...",
        recording_id
    ))))
}

/// Background unit: runs in its own task, so it checks out its own session.
async fn open_meeting_job<D: Database>(
    db: D,
    user_id: EntityId,
    recording_id: String,
) -> ApiResult<MeetingSession> {
    let session = db.session().await?;
    let meeting = services::open_session(&session, user_id, &recording_id).await?;
    tracing::info!(
        tenant_id = %meeting.tenant_id,
        session_id = %meeting.id,
        recording_id = %meeting.recording_id,
        "meeting session queued"
    );
    Ok(meeting)
}

/// POST /slack/interactions
pub async fn interactions<D: Database>(
    RequestSession(session): RequestSession<D::Session>,
    Form(form): Form<InteractionForm>,
) -> ApiResult<Json<Value>> {
    let payload = parse_interaction(&form.payload)?;

    let (user, _) = services::record_interaction(
        &*session,
        Interaction {
            external_user_id: payload.user.id.clone(),
            username: payload.user.username.clone(),
        },
    )
    .await?;

    if payload.kind != "block_actions" {
        return Ok(Json(json!({ "status": "ok" })));
    }

    let mut touched = Vec::new();
    for action in &payload.actions {
        let value = action.value.as_deref().unwrap_or_default();
        match action.action_id.as_str() {
            "process_meeting_button" if !value.is_empty() => {
                let meeting = services::open_session(&*session, user.id, value).await?;
                touched.push(SessionSummary::from(&meeting));
            }
            "cancel_button" => {
                let meeting = services::load_session(&*session, parse_session_id(value)?).await?;
                let meeting = if meeting.is_finished() {
                    meeting
                } else {
                    services::mark_failed(&*session, meeting, "Cancelled by user").await?
                };
                touched.push(SessionSummary::from(&meeting));
            }
            "execute_button" | "view_session" => {
                let meeting = services::load_session(&*session, parse_session_id(value)?).await?;
                touched.push(SessionSummary::from(&meeting));
            }
            "select_meeting" | "actions_checkbox" => {}
            other => {
                tracing::debug!(action_id = other, "ignoring unhandled action");
            }
        }
    }

    Ok(Json(json!({ "status": "ok", "sessions": touched })))
}

fn parse_interaction(raw: &str) -> ApiResult<InteractionPayload> {
    serde_json::from_str(raw).map_err(|e| {
        tracing::warn!(error = %e, "interaction payload rejected");
        ApiError::malformed_request("Invalid interaction payload")
    })
}

fn parse_session_id(value: &str) -> ApiResult<EntityId> {
    value
        .parse::<EntityId>()
        .map_err(|_| ApiError::invalid_input("Action value is not a session id"))
}

/// POST /slack/events
///
/// URL verification is answered by the tenant middleware; everything that
/// reaches this handler is acknowledged.
pub async fn events(
    CurrentTenant(tenant): CurrentTenant,
    Json(event): Json<Value>,
) -> Json<Value> {
    let kind = event
        .get("event")
        .and_then(|e| e.get("type"))
        .or_else(|| event.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    tracing::info!(tenant_id = %tenant.id, event_type = kind, "event received");
    Json(json!({ "status": "ok" }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router<D: Database>() -> Router<AppState<D>> {
    Router::new()
        .route("/commands", post(slash_command::<D>))
        .route("/interactions", post(interactions::<D>))
        .route("/events", post(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_payload_parses() -> Result<(), String> {
        let raw = r#"{
            "type": "block_actions",
            "team": {"id": "T1"},
            "user": {"id": "U1", "username": "ana"},
            "actions": [{"action_id": "cancel_button", "value": "0191e3a4-7b2c-7000-8000-000000000001"}]
        }"#;
        let payload: InteractionPayload = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        assert_eq!(payload.kind, "block_actions");
        assert_eq!(payload.user.username.as_deref(), Some("ana"));
        assert_eq!(payload.actions[0].action_id, "cancel_button");
        assert!(parse_session_id(payload.actions[0].value.as_deref().unwrap_or_default()).is_ok());
        Ok(())
    }

    #[test]
    fn test_bad_interaction_payload_hides_decoder_text() {
        let err = parse_interaction(r#"{"type": "block_actions", "user": 7}"#).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::MalformedRequest);
        assert_eq!(err.message, "Invalid interaction payload");
        assert!(!err.message.contains("invalid type"));
        assert!(err.details.is_none());
    }

    #[test]
    fn test_parse_session_id_rejects_garbage() {
        let err = parse_session_id("rec-123").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
    }

    #[test]
    fn test_ephemeral_message_shape() -> Result<(), String> {
        let json = serde_json::to_value(EphemeralMessage::new("hi")).map_err(|e| e.to_string())?;
        assert_eq!(json, json!({ "response_type": "ephemeral", "text": "hi" }));
        Ok(())
    }
}
