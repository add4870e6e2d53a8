//! Meeting Session Service
//!
//! Lifecycle of the per-recording processing sessions.

use followup_core::{EntityId, MeetingSession, NewMeetingSession, ProcessingStatus};
use followup_storage::{
    create_scoped, get_scoped_by_id, lookup_scoped, scoped_query, update_scoped, EntityStore,
    LookupStore,
};

use crate::error::{ApiError, ApiResult};

/// Open a pending session for `recording_id`, or return the unfinished one
/// the user already has for it.
pub async fn open_session<S>(
    store: &S,
    user_id: EntityId,
    recording_id: &str,
) -> ApiResult<MeetingSession>
where
    S: EntityStore<MeetingSession> + LookupStore + ?Sized,
{
    let existing =
        lookup_scoped(|tenant_id| store.open_meeting_session(tenant_id, user_id, recording_id))
            .await?;
    if let Some(session) = existing {
        tracing::debug!(session_id = %session.id, recording_id, "meeting session already open");
        return Ok(session);
    }

    let session = create_scoped(store, NewMeetingSession::new(user_id, recording_id)).await?;
    tracing::info!(session_id = %session.id, recording_id, "meeting session opened");
    Ok(session)
}

/// Load a session of the current tenant by primary key.
pub async fn load_session<S>(store: &S, id: EntityId) -> ApiResult<MeetingSession>
where
    S: EntityStore<MeetingSession> + ?Sized,
{
    get_scoped_by_id::<MeetingSession, S>(store, id)
        .await?
        .ok_or_else(|| ApiError::entity_not_found("MeetingSession", id))
}

/// Move a session to `status`. Finished sessions do not move.
pub async fn transition<S>(
    store: &S,
    session: MeetingSession,
    status: ProcessingStatus,
) -> ApiResult<MeetingSession>
where
    S: EntityStore<MeetingSession> + ?Sized,
{
    if session.is_finished() {
        return Err(ApiError::invalid_input(format!(
            "Meeting session is already {}",
            session.processing_status
        )));
    }
    Ok(update_scoped(store, session, move |s| s.processing_status = status).await?)
}

pub async fn mark_failed<S>(
    store: &S,
    session: MeetingSession,
    message: &str,
) -> ApiResult<MeetingSession>
where
    S: EntityStore<MeetingSession> + ?Sized,
{
    let message = message.to_string();
    Ok(update_scoped(store, session, move |s| s.fail(message)).await?)
}

/// The user's sessions, newest first.
pub async fn recent_sessions<S>(
    store: &S,
    user_id: EntityId,
    limit: usize,
) -> ApiResult<Vec<MeetingSession>>
where
    S: EntityStore<MeetingSession> + ?Sized,
{
    let mut sessions = scoped_query::<MeetingSession, S>(store)?
        .filter(move |s| s.user_id == user_id)
        .all()
        .await?;
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sessions.truncate(limit);
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use followup_core::{new_entity_id, Installation, Tenant};
    use followup_storage::{context::with_tenant, MockStorage};
    use std::sync::Arc;

    fn tenant(external_id: &str) -> Arc<Tenant> {
        Arc::new(Tenant::provisioned(
            Installation {
                external_id: external_id.to_string(),
                name: external_id.to_string(),
                domain: None,
                installed_by_user_id: None,
            },
            Utc::now(),
        ))
    }

    #[tokio::test]
    async fn test_open_is_idempotent_until_finished() {
        let storage = MockStorage::new();
        let user_id = new_entity_id();
        with_tenant(tenant("T1"), async {
            let first = open_session(&storage, user_id, "rec-1").await.expect("open");
            assert_eq!(first.processing_status, ProcessingStatus::Pending);

            let again = open_session(&storage, user_id, "rec-1").await.expect("reopen");
            assert_eq!(again.id, first.id);

            mark_failed(&storage, again, "transcript unavailable")
                .await
                .expect("fail");
            let fresh = open_session(&storage, user_id, "rec-1").await.expect("new");
            assert_ne!(fresh.id, first.id);
        })
        .await
        .expect("context");
    }

    #[tokio::test]
    async fn test_finished_sessions_do_not_transition() {
        let storage = MockStorage::new();
        with_tenant(tenant("T1"), async {
            let session = open_session(&storage, new_entity_id(), "rec-2")
                .await
                .expect("open");
            let done = transition(&storage, session, ProcessingStatus::Completed)
                .await
                .expect("complete");
            let err = transition(&storage, done, ProcessingStatus::Processing)
                .await
                .unwrap_err();
            assert_eq!(err.code, crate::error::ErrorCode::InvalidInput);
        })
        .await
        .expect("context");
    }

    #[tokio::test]
    async fn test_load_other_tenants_session_is_denied() {
        let storage = MockStorage::new();
        let foreign = with_tenant(tenant("T1"), open_session(&storage, new_entity_id(), "rec-3"))
            .await
            .expect("context")
            .expect("open");

        let err = with_tenant(tenant("T2"), load_session(&storage, foreign.id))
            .await
            .expect("context")
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::AccessDenied);

        let missing = with_tenant(tenant("T2"), load_session(&storage, new_entity_id()))
            .await
            .expect("context")
            .unwrap_err();
        assert_eq!(missing.code, crate::error::ErrorCode::EntityNotFound);
    }

    #[tokio::test]
    async fn test_recent_sessions_newest_first() {
        let storage = MockStorage::new();
        let user_id = new_entity_id();
        with_tenant(tenant("T1"), async {
            for rec in ["a", "b", "c"] {
                open_session(&storage, user_id, rec).await.expect("open");
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
            open_session(&storage, new_entity_id(), "other").await.expect("open");

            let recent = recent_sessions(&storage, user_id, 2).await.expect("list");
            let recordings: Vec<_> = recent.iter().map(|s| s.recording_id.as_str()).collect();
            assert_eq!(recordings, vec!["c", "b"]);
        })
        .await
        .expect("context");
    }
}
