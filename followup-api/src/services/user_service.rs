//! User Service
//!
//! Tracks the workspace members that talk to the bot.

use chrono::Utc;
use followup_core::{
    AuditCategory, AuditRecord, EntityKind, NewAuditRecord, NewUser, ScopeError, StorageError,
    User,
};
use followup_storage::{create_scoped, lookup_scoped, update_scoped, EntityStore, LookupStore};

use crate::error::{ApiError, ApiResult};

/// A user interaction, as seen in a slash command or interaction payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    pub external_user_id: String,
    pub username: Option<String>,
}

/// Record that a user interacted with the bot.
///
/// Creates the user on first sight, otherwise bumps `last_active_at` (and
/// the username if it changed). Returns the user and whether it was created.
pub async fn record_interaction<S>(store: &S, interaction: Interaction) -> ApiResult<(User, bool)>
where
    S: EntityStore<User> + EntityStore<AuditRecord> + LookupStore + ?Sized,
{
    if let Some(user) = find_user(store, &interaction.external_user_id).await? {
        let user = touch_user(store, user, interaction.username).await?;
        return Ok((user, false));
    }

    let mut draft = NewUser::new(interaction.external_user_id.clone());
    if let Some(username) = interaction.username.clone() {
        draft = draft.with_username(username);
    }

    match create_scoped(store, draft).await {
        Ok(user) => {
            tracing::info!(user_id = %user.id, external_user_id = %user.external_user_id, "new user recorded");
            audit_first_seen(store, &user).await;
            Ok((user, true))
        }
        // A concurrent request created the user first.
        Err(ScopeError::Storage(StorageError::UniqueViolation { .. })) => {
            match find_user(store, &interaction.external_user_id).await? {
                Some(user) => Ok((touch_user(store, user, interaction.username).await?, false)),
                None => Err(ApiError::entity_not_found(
                    "User",
                    &interaction.external_user_id,
                )),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Live user with the given external id in the current tenant.
pub async fn find_user<S>(store: &S, external_user_id: &str) -> ApiResult<Option<User>>
where
    S: LookupStore + ?Sized,
{
    Ok(lookup_scoped(|tenant_id| store.user_by_external_id(tenant_id, external_user_id)).await?)
}

async fn touch_user<S>(store: &S, user: User, username: Option<String>) -> ApiResult<User>
where
    S: EntityStore<User> + ?Sized,
{
    let now = Utc::now();
    Ok(update_scoped(store, user, move |user| {
        user.last_active_at = now;
        if let Some(username) = username {
            user.username = Some(username);
        }
    })
    .await?)
}

async fn audit_first_seen<S>(store: &S, user: &User)
where
    S: EntityStore<AuditRecord> + ?Sized,
{
    let draft = NewAuditRecord::new("user.first_seen", AuditCategory::Authentication)
        .resource(EntityKind::User, user.id)
        .by_user(user.id);
    if let Err(e) = create_scoped(store, draft).await {
        tracing::warn!(error = %e, user_id = %user.id, "audit write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use followup_core::{
        ApiRateLimit, EntityId, Installation, LimitPeriod, MeetingSession, StorageResult, Tenant,
        TenantId,
    };
    use followup_storage::{
        context::with_tenant, delete_scoped, scoped_query, DeleteMode, MockStorage,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
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

    fn interaction(user: &str, name: Option<&str>) -> Interaction {
        Interaction {
            external_user_id: user.to_string(),
            username: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_first_sight_creates_then_touches() {
        let storage = MockStorage::new();
        let t1 = tenant("T1");

        with_tenant(t1.clone(), async {
            let (first, created) = record_interaction(&storage, interaction("U1", Some("ana")))
                .await
                .expect("first");
            assert!(created);
            assert_eq!(first.tenant_id, t1.id);

            let (second, created) = record_interaction(&storage, interaction("U1", Some("ana.b")))
                .await
                .expect("second");
            assert!(!created);
            assert_eq!(second.id, first.id);
            assert_eq!(second.username.as_deref(), Some("ana.b"));
            assert!(second.last_active_at >= first.last_active_at);
        })
        .await
        .expect("context");

        assert_eq!(storage.user_count(), 1);
        assert!(storage
            .audit_records()
            .iter()
            .any(|r| r.event_type == "user.first_seen" && r.tenant_id == t1.id));
    }

    #[tokio::test]
    async fn test_same_external_user_in_two_tenants() {
        let storage = MockStorage::new();

        let (a, _) = with_tenant(tenant("T1"), record_interaction(&storage, interaction("U1", None)))
            .await
            .expect("context")
            .expect("T1 user");
        let (b, created) =
            with_tenant(tenant("T2"), record_interaction(&storage, interaction("U1", None)))
                .await
                .expect("context")
                .expect("T2 user");

        assert!(created);
        assert_ne!(a.id, b.id);
        assert_ne!(a.tenant_id, b.tenant_id);
        assert_eq!(storage.user_count(), 2);
    }

    #[tokio::test]
    async fn test_without_context_fails() {
        let storage = MockStorage::new();
        let err = record_interaction(&storage, interaction("U1", None))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::TenantContextError);
        assert_eq!(storage.user_count(), 0);
    }

    #[tokio::test]
    async fn test_returning_user_after_soft_delete_is_recreated() {
        let storage = MockStorage::new();
        with_tenant(tenant("T1"), async {
            let (old, _) = record_interaction(&storage, interaction("U1", None))
                .await
                .expect("first");
            delete_scoped(&storage, old.clone(), DeleteMode::Soft)
                .await
                .expect("remove");

            let (fresh, created) = record_interaction(&storage, interaction("U1", None))
                .await
                .expect("returning user");
            assert!(created);
            assert_ne!(fresh.id, old.id);

            let live = scoped_query::<User, _>(&storage)
                .expect("query")
                .count()
                .await
                .expect("count");
            assert_eq!(live, 1);
        })
        .await
        .expect("context");
    }

    /// Misses the first lookup, as if another request inserted the user
    /// between the lookup and the insert.
    struct RacedStore {
        inner: MockStorage,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl LookupStore for RacedStore {
        async fn user_by_external_id(
            &self,
            tenant_id: TenantId,
            external_user_id: &str,
        ) -> StorageResult<Option<User>> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            self.inner.user_by_external_id(tenant_id, external_user_id).await
        }
        async fn rate_limit_counter(
            &self,
            tenant_id: TenantId,
            resource_type: &str,
            period: LimitPeriod,
        ) -> StorageResult<Option<ApiRateLimit>> {
            self.inner.rate_limit_counter(tenant_id, resource_type, period).await
        }
        async fn open_meeting_session(
            &self,
            tenant_id: TenantId,
            user_id: EntityId,
            recording_id: &str,
        ) -> StorageResult<Option<MeetingSession>> {
            self.inner.open_meeting_session(tenant_id, user_id, recording_id).await
        }
    }

    macro_rules! delegate_entity_store {
        ($entity:ty) => {
            #[async_trait]
            impl EntityStore<$entity> for RacedStore {
                async fn get(&self, id: EntityId) -> StorageResult<Option<$entity>> {
                    EntityStore::<$entity>::get(&self.inner, id).await
                }
                async fn list(
                    &self,
                    tenant_id: TenantId,
                    include_deleted: bool,
                    limit: Option<usize>,
                ) -> StorageResult<Vec<$entity>> {
                    EntityStore::<$entity>::list(&self.inner, tenant_id, include_deleted, limit)
                        .await
                }
                async fn insert(&self, entity: &$entity) -> StorageResult<()> {
                    EntityStore::<$entity>::insert(&self.inner, entity).await
                }
                async fn update(&self, entity: &$entity) -> StorageResult<()> {
                    EntityStore::<$entity>::update(&self.inner, entity).await
                }
                async fn remove(&self, entity: &$entity) -> StorageResult<()> {
                    EntityStore::<$entity>::remove(&self.inner, entity).await
                }
            }
        };
    }

    delegate_entity_store!(User);
    delegate_entity_store!(AuditRecord);

    #[tokio::test]
    async fn test_concurrent_create_falls_back_to_existing_user() {
        let storage = MockStorage::new();
        let t1 = tenant("T1");
        let (winner, _) = with_tenant(t1.clone(), record_interaction(&storage, interaction("U1", None)))
            .await
            .expect("context")
            .expect("winner");

        let raced = RacedStore {
            inner: storage.clone(),
            lookups: AtomicUsize::new(0),
        };
        let (loser, created) = with_tenant(
            t1,
            record_interaction(&raced, interaction("U1", Some("ana"))),
        )
        .await
        .expect("context")
        .expect("falls back to the stored user");

        assert!(!created);
        assert_eq!(loser.id, winner.id);
        assert_eq!(loser.username.as_deref(), Some("ana"));
        assert_eq!(raced.lookups.load(Ordering::SeqCst), 2);
        assert_eq!(storage.user_count(), 1);
        let first_seen = storage
            .audit_records()
            .into_iter()
            .filter(|r| r.event_type == "user.first_seen")
            .count();
        assert_eq!(first_seen, 1);
    }
}
