//! In-memory store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use followup_core::{
    AccountMapping, ApiRateLimit, AuditRecord, CrmConnection, DeletionPolicy, EntityId,
    EntityKind, LimitPeriod, MeetingSession, Resource, StorageError, StorageResult, Tenant,
    TenantId, TenantScoped, User,
};

use crate::store::{Database, EntityStore, LookupStore, TenantStore};

type Table<K, V> = Arc<RwLock<HashMap<K, V>>>;

/// In-memory storage for tests and local development.
///
/// Clones share the same tables, so a `MockStorage` is both the database and
/// every session opened from it.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    tenants: Table<TenantId, Tenant>,
    users: Table<EntityId, User>,
    crm_connections: Table<EntityId, CrmConnection>,
    meeting_sessions: Table<EntityId, MeetingSession>,
    account_mappings: Table<EntityId, AccountMapping>,
    rate_limits: Table<EntityId, ApiRateLimit>,
    audit_records: Table<EntityId, AuditRecord>,
    sessions_opened: Arc<AtomicUsize>,
}

impl MockStorage {
    /// Create a new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        fn wipe<K, V>(table: &Table<K, V>) {
            if let Ok(mut rows) = table.write() {
                rows.clear();
            }
        }
        wipe(&self.tenants);
        wipe(&self.users);
        wipe(&self.crm_connections);
        wipe(&self.meeting_sessions);
        wipe(&self.account_mappings);
        wipe(&self.rate_limits);
        wipe(&self.audit_records);
    }

    /// Get count of stored tenants, soft-deleted ones included.
    pub fn tenant_count(&self) -> usize {
        self.tenants.read().map(|t| t.len()).unwrap_or_default()
    }

    /// Get count of stored users across all tenants.
    pub fn user_count(&self) -> usize {
        self.users.read().map(|u| u.len()).unwrap_or_default()
    }

    /// All audit records, oldest first.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        let mut records: Vec<AuditRecord> = self
            .audit_records
            .read()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    /// Number of sessions handed out by [`Database::session`].
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantStore for MockStorage {
    async fn tenant_by_external_id(&self, external_id: &str) -> StorageResult<Option<Tenant>> {
        let tenants = self.tenants.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tenants
            .values()
            .find(|t| t.external_id == external_id && !t.is_deleted())
            .cloned())
    }

    async fn tenant_by_id(&self, id: TenantId) -> StorageResult<Option<Tenant>> {
        let tenants = self.tenants.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tenants.get(&id).filter(|t| !t.is_deleted()).cloned())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StorageResult<()> {
        let mut tenants = self.tenants.write().map_err(|_| StorageError::LockPoisoned)?;
        if tenants.contains_key(&tenant.id) {
            return Err(StorageError::InsertFailed {
                kind: EntityKind::Tenant,
                reason: "already exists".to_string(),
            });
        }
        let duplicate = tenants
            .values()
            .any(|t| t.external_id == tenant.external_id && !t.is_deleted());
        if duplicate && !tenant.is_deleted() {
            return Err(StorageError::UniqueViolation {
                kind: EntityKind::Tenant,
                detail: format!("external_id {} already installed", tenant.external_id),
            });
        }
        tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StorageResult<()> {
        let mut tenants = self.tenants.write().map_err(|_| StorageError::LockPoisoned)?;
        match tenants.get_mut(&tenant.id) {
            Some(existing) => {
                *existing = tenant.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                kind: EntityKind::Tenant,
                id: tenant.id.as_uuid(),
            }),
        }
    }

    async fn active_tenants(&self, limit: usize) -> StorageResult<Vec<Tenant>> {
        let tenants = self.tenants.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut active: Vec<Tenant> = tenants
            .values()
            .filter(|t| !t.is_deleted() && t.subscription_status.permits_access())
            .cloned()
            .collect();
        active.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        active.truncate(limit);
        Ok(active)
    }
}

/// Table constraints beyond the primary key, mirroring the Postgres schema.
trait MockConstraints: TenantScoped {
    /// Describe the clash when `self` may not be stored next to `existing`.
    fn conflicts_with(&self, _existing: &Self) -> Option<String> {
        None
    }
}

impl MockConstraints for User {
    fn conflicts_with(&self, existing: &Self) -> Option<String> {
        let clash = existing.tenant_id == self.tenant_id
            && existing.external_user_id == self.external_user_id
            && !existing.is_deleted()
            && !self.is_deleted();
        clash.then(|| "users_tenant_external_user_live_key".to_string())
    }
}

impl MockConstraints for CrmConnection {}
impl MockConstraints for MeetingSession {}
impl MockConstraints for AccountMapping {}
impl MockConstraints for ApiRateLimit {}
impl MockConstraints for AuditRecord {}

fn refuse_immutable<T: TenantScoped>(entity: &T) -> StorageResult<()> {
    if T::DELETION == DeletionPolicy::Immutable {
        return Err(StorageError::UpdateFailed {
            kind: T::KIND,
            id: entity.resource_id(),
            reason: "rows are immutable".to_string(),
        });
    }
    Ok(())
}

/// Implements [`EntityStore`] for one table field of [`MockStorage`].
macro_rules! mock_entity_store {
    ($entity:ty, $field:ident) => {
        #[async_trait]
        impl EntityStore<$entity> for MockStorage {
            async fn get(&self, id: EntityId) -> StorageResult<Option<$entity>> {
                let rows = self.$field.read().map_err(|_| StorageError::LockPoisoned)?;
                Ok(rows.get(&id).cloned())
            }

            async fn list(
                &self,
                tenant_id: TenantId,
                include_deleted: bool,
                limit: Option<usize>,
            ) -> StorageResult<Vec<$entity>> {
                let rows = self.$field.read().map_err(|_| StorageError::LockPoisoned)?;
                let mut matching: Vec<$entity> = rows
                    .values()
                    .filter(|row| row.tenant_id() == tenant_id)
                    .filter(|row| include_deleted || !row.is_deleted())
                    .cloned()
                    .collect();
                matching.sort_by_key(|row| (row.created_at(), row.resource_id()));
                if let Some(limit) = limit {
                    matching.truncate(limit);
                }
                Ok(matching)
            }

            async fn insert(&self, entity: &$entity) -> StorageResult<()> {
                let mut rows = self.$field.write().map_err(|_| StorageError::LockPoisoned)?;
                if rows.contains_key(&entity.resource_id()) {
                    return Err(StorageError::InsertFailed {
                        kind: <$entity as Resource>::KIND,
                        reason: "already exists".to_string(),
                    });
                }
                if let Some(detail) = rows.values().find_map(|row| entity.conflicts_with(row)) {
                    return Err(StorageError::UniqueViolation {
                        kind: <$entity as Resource>::KIND,
                        detail,
                    });
                }
                rows.insert(entity.resource_id(), entity.clone());
                Ok(())
            }

            async fn update(&self, entity: &$entity) -> StorageResult<()> {
                refuse_immutable(entity)?;
                let mut rows = self.$field.write().map_err(|_| StorageError::LockPoisoned)?;
                let id = entity.resource_id();
                if let Some(detail) = rows
                    .values()
                    .filter(|row| row.resource_id() != id)
                    .find_map(|row| entity.conflicts_with(row))
                {
                    return Err(StorageError::UniqueViolation {
                        kind: <$entity as Resource>::KIND,
                        detail,
                    });
                }
                match rows.get_mut(&id) {
                    Some(row) if row.tenant_id() == entity.tenant_id() => {
                        *row = entity.clone();
                        Ok(())
                    }
                    _ => Err(StorageError::NotFound {
                        kind: <$entity as Resource>::KIND,
                        id,
                    }),
                }
            }

            async fn remove(&self, entity: &$entity) -> StorageResult<()> {
                refuse_immutable(entity)?;
                let mut rows = self.$field.write().map_err(|_| StorageError::LockPoisoned)?;
                let owned = rows
                    .get(&entity.resource_id())
                    .is_some_and(|row| row.tenant_id() == entity.tenant_id());
                if !owned {
                    return Err(StorageError::NotFound {
                        kind: <$entity as Resource>::KIND,
                        id: entity.resource_id(),
                    });
                }
                rows.remove(&entity.resource_id());
                Ok(())
            }
        }
    };
}

mock_entity_store!(User, users);
mock_entity_store!(CrmConnection, crm_connections);
mock_entity_store!(MeetingSession, meeting_sessions);
mock_entity_store!(AccountMapping, account_mappings);
mock_entity_store!(ApiRateLimit, rate_limits);
mock_entity_store!(AuditRecord, audit_records);

/// Oldest live row of `tenant_id` matching `wanted`.
fn first_live<T, F>(
    table: &Table<EntityId, T>,
    tenant_id: TenantId,
    wanted: F,
) -> StorageResult<Option<T>>
where
    T: TenantScoped,
    F: Fn(&T) -> bool,
{
    let rows = table.read().map_err(|_| StorageError::LockPoisoned)?;
    Ok(rows
        .values()
        .filter(|row| row.tenant_id() == tenant_id && !row.is_deleted() && wanted(row))
        .min_by_key(|row| (row.created_at(), row.resource_id()))
        .cloned())
}

#[async_trait]
impl LookupStore for MockStorage {
    async fn user_by_external_id(
        &self,
        tenant_id: TenantId,
        external_user_id: &str,
    ) -> StorageResult<Option<User>> {
        first_live(&self.users, tenant_id, |u| u.external_user_id == external_user_id)
    }

    async fn rate_limit_counter(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        period: LimitPeriod,
    ) -> StorageResult<Option<ApiRateLimit>> {
        first_live(&self.rate_limits, tenant_id, |r| {
            r.resource_type == resource_type && r.limit_period == period
        })
    }

    async fn open_meeting_session(
        &self,
        tenant_id: TenantId,
        user_id: EntityId,
        recording_id: &str,
    ) -> StorageResult<Option<MeetingSession>> {
        first_live(&self.meeting_sessions, tenant_id, |s| {
            s.user_id == user_id && s.recording_id == recording_id && !s.is_finished()
        })
    }
}

#[async_trait]
impl Database for MockStorage {
    type Session = MockStorage;

    async fn session(&self) -> StorageResult<MockStorage> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.clone())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}
