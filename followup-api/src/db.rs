//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling via deadpool-postgres and the Postgres
//! implementation of the store traits. Rows travel as JSON: reads select
//! `row_to_json(t)` and deserialize into the entity, writes hand the
//! serialized entity to `jsonb_populate_record` so column names and field
//! names are the same thing.
//!
//! One [`DbSession`] owns one pooled connection for the length of a request.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use followup_core::{
    AccountMapping, ApiRateLimit, AuditRecord, CrmConnection, EntityId, EntityKind, LimitPeriod,
    MeetingSession, ProcessingStatus, Resource, StorageError, StorageResult, Tenant, TenantId,
    TenantScoped, User,
};
use followup_storage::{Database, EntityStore, LookupStore, TenantStore};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use crate::error::{ApiError, ApiResult};

/// Schema applied by [`DbClient::migrate`].
pub const INITIAL_SCHEMA: &str = include_str!("../migrations/001_initial_schema.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: SecretString,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a free connection before giving up
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "followup".to_string(),
            user: "postgres".to_string(),
            password: SecretString::new("".into()),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FOLLOWUP_DB_HOST` (default: localhost)
    /// - `FOLLOWUP_DB_PORT` (default: 5432)
    /// - `FOLLOWUP_DB_NAME` (default: followup)
    /// - `FOLLOWUP_DB_USER` (default: postgres)
    /// - `FOLLOWUP_DB_PASSWORD` (default: empty)
    /// - `FOLLOWUP_DB_POOL_SIZE` (default: 16)
    /// - `FOLLOWUP_DB_TIMEOUT` seconds (default: 30)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("FOLLOWUP_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("FOLLOWUP_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("FOLLOWUP_DB_NAME").unwrap_or_else(|_| "followup".to_string()),
            user: std::env::var("FOLLOWUP_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: SecretString::new(
                std::env::var("FOLLOWUP_DB_PASSWORD")
                    .unwrap_or_default()
                    .into(),
            ),
            max_size: std::env::var("FOLLOWUP_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("FOLLOWUP_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Pool handle shared by every request.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        let status = self.pool.status();
        status.size
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> ApiResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(ApiError::from)
    }

    /// Apply the bundled schema. Statements are idempotent.
    pub async fn migrate(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(INITIAL_SCHEMA).await?;
        tracing::info!("Database schema applied");
        Ok(())
    }
}

fn pool_error(err: deadpool_postgres::PoolError) -> StorageError {
    tracing::error!("Connection pool error: {:?}", err);
    StorageError::Backend {
        reason: "failed to acquire database connection".to_string(),
    }
}

#[async_trait]
impl Database for DbClient {
    type Session = DbSession;

    async fn session(&self) -> StorageResult<DbSession> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        Ok(DbSession { conn })
    }

    async fn ping(&self) -> StorageResult<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| query_error(EntityKind::Tenant, e))
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// A tenant-scoped entity stored in its own table.
pub trait PgEntity: TenantScoped + Serialize + DeserializeOwned {
    const TABLE: &'static str;

    /// Columns an update may overwrite. Identity, owner and creation time
    /// are never among them.
    const MUTABLE_COLUMNS: &'static [&'static str];

    /// Whether the table has a `deleted_at` column.
    const SOFT_DELETE: bool = true;
}

macro_rules! pg_entity {
    ($entity:ty, $table:literal, [$($col:literal),+ $(,)?]) => {
        impl PgEntity for $entity {
            const TABLE: &'static str = $table;
            const MUTABLE_COLUMNS: &'static [&'static str] = &[$($col),+];
        }
    };
}

pg_entity!(User, "users", [
    "username", "email", "real_name", "role", "is_active", "preferred_language",
    "notification_settings", "first_seen_at", "last_active_at", "updated_at", "deleted_at",
]);

pg_entity!(CrmConnection, "crm_connections", [
    "provider", "connection_name", "credentials_secret_id", "status", "is_default",
    "last_sync_at", "last_error", "connected_by_user_id", "updated_at", "deleted_at",
]);

pg_entity!(MeetingSession, "meeting_sessions", [
    "user_id", "recording_id", "meeting_title", "meeting_date", "processing_status",
    "crm_account_id", "email_draft_id", "calendar_event_id", "crm_note_id", "error_message",
    "updated_at", "deleted_at",
]);

pg_entity!(AccountMapping, "account_mappings", [
    "email_domain", "crm_account_id", "crm_account_name", "mapping_source", "verified",
    "times_used", "last_used_at", "updated_at", "deleted_at",
]);

pg_entity!(ApiRateLimit, "api_rate_limits", [
    "resource_type", "limit_period", "limit_value", "current_count", "period_start",
    "period_end", "updated_at", "deleted_at",
]);

impl PgEntity for AuditRecord {
    const TABLE: &'static str = "audit_records";
    // Rejected by the table trigger; listed so the statement is well formed.
    const MUTABLE_COLUMNS: &'static [&'static str] = &["action_description"];
    const SOFT_DELETE: bool = false;
}

const TENANT_MUTABLE_COLUMNS: &[&str] = &[
    "name",
    "domain",
    "plan_tier",
    "subscription_status",
    "trial_ends_at",
    "default_crm_provider",
    "timezone",
    "locale",
    "installed_by_user_id",
    "updated_at",
    "deleted_at",
];

fn query_error(kind: EntityKind, err: tokio_postgres::Error) -> StorageError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        let detail = err
            .as_db_error()
            .and_then(|db| db.constraint().map(str::to_string))
            .unwrap_or_else(|| "unique constraint".to_string());
        return StorageError::UniqueViolation { kind, detail };
    }
    tracing::error!(%kind, "Database error: {:?}", err);
    StorageError::Backend {
        reason: format!("{} query failed", kind),
    }
}

fn update_sql(table: &str, columns: &[&str], key: &str) -> String {
    let columns = columns.join(", ");
    format!(
        "UPDATE {table} AS t SET ({columns}) = \
         (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)) \
         WHERE {key}"
    )
}

fn list_sql(table: &str, soft_delete: bool) -> String {
    let live = if soft_delete {
        "($2 OR t.deleted_at IS NULL)"
    } else {
        "$2::boolean IS NOT NULL"
    };
    format!(
        "SELECT row_to_json(t) FROM {table} t \
         WHERE t.tenant_id = $1 AND {live} \
         ORDER BY t.created_at, t.id LIMIT $3"
    )
}

fn encode<T: Serialize>(kind: EntityKind, entity: &T) -> StorageResult<JsonValue> {
    serde_json::to_value(entity).map_err(|e| StorageError::InsertFailed {
        kind,
        reason: format!("encode failed: {}", e),
    })
}

// ============================================================================
// SESSION
// ============================================================================

/// One request's connection.
pub struct DbSession {
    conn: deadpool_postgres::Object,
}

impl DbSession {
    async fn fetch<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<Vec<T>> {
        let rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| query_error(kind, e))?;
        rows.iter()
            .map(|row| {
                let value: JsonValue = row.try_get(0).map_err(|e| StorageError::Decode {
                    kind,
                    reason: e.to_string(),
                })?;
                serde_json::from_value(value).map_err(|e| StorageError::Decode {
                    kind,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn fetch_one<T: DeserializeOwned>(
        &self,
        kind: EntityKind,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<Option<T>> {
        Ok(self.fetch(kind, sql, params).await?.into_iter().next())
    }

    async fn execute(
        &self,
        kind: EntityKind,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<u64> {
        self.conn
            .execute(sql, params)
            .await
            .map_err(|e| query_error(kind, e))
    }
}

#[async_trait]
impl TenantStore for DbSession {
    async fn tenant_by_external_id(&self, external_id: &str) -> StorageResult<Option<Tenant>> {
        self.fetch_one(
            EntityKind::Tenant,
            "SELECT row_to_json(t) FROM tenants t \
             WHERE t.external_id = $1 AND t.deleted_at IS NULL",
            &[&external_id],
        )
        .await
    }

    async fn tenant_by_id(&self, id: TenantId) -> StorageResult<Option<Tenant>> {
        self.fetch_one(
            EntityKind::Tenant,
            "SELECT row_to_json(t) FROM tenants t WHERE t.id = $1 AND t.deleted_at IS NULL",
            &[&id.as_uuid()],
        )
        .await
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StorageResult<()> {
        let value = encode(EntityKind::Tenant, tenant)?;
        self.execute(
            EntityKind::Tenant,
            "INSERT INTO tenants SELECT * FROM jsonb_populate_record(NULL::tenants, $1)",
            &[&value],
        )
        .await?;
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StorageResult<()> {
        let value = encode(EntityKind::Tenant, tenant)?;
        let sql = update_sql("tenants", TENANT_MUTABLE_COLUMNS, "t.id = $2");
        let updated = self
            .execute(EntityKind::Tenant, &sql, &[&value, &tenant.id.as_uuid()])
            .await?;
        if updated == 0 {
            return Err(StorageError::NotFound {
                kind: EntityKind::Tenant,
                id: tenant.id.as_uuid(),
            });
        }
        Ok(())
    }

    async fn active_tenants(&self, limit: usize) -> StorageResult<Vec<Tenant>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.fetch(
            EntityKind::Tenant,
            "SELECT row_to_json(t) FROM tenants t \
             WHERE t.deleted_at IS NULL AND t.subscription_status IN ('active', 'trial') \
             ORDER BY t.updated_at DESC LIMIT $1",
            &[&limit],
        )
        .await
    }
}

#[async_trait]
impl<T: PgEntity> EntityStore<T> for DbSession {
    async fn get(&self, id: EntityId) -> StorageResult<Option<T>> {
        let sql = format!("SELECT row_to_json(t) FROM {} t WHERE t.id = $1", T::TABLE);
        self.fetch_one(T::KIND, &sql, &[&id]).await
    }

    async fn list(
        &self,
        tenant_id: TenantId,
        include_deleted: bool,
        limit: Option<usize>,
    ) -> StorageResult<Vec<T>> {
        let tenant_uuid = tenant_id.as_uuid();
        // NULL means no limit.
        let limit = limit.map(|n| i64::try_from(n).unwrap_or(i64::MAX));
        let sql = list_sql(T::TABLE, T::SOFT_DELETE);
        self.fetch(T::KIND, &sql, &[&tenant_uuid, &include_deleted, &limit])
            .await
    }

    async fn insert(&self, entity: &T) -> StorageResult<()> {
        let value = encode(T::KIND, entity)?;
        let sql = format!(
            "INSERT INTO {table} SELECT * FROM jsonb_populate_record(NULL::{table}, $1)",
            table = T::TABLE
        );
        self.execute(T::KIND, &sql, &[&value]).await?;
        Ok(())
    }

    async fn update(&self, entity: &T) -> StorageResult<()> {
        let value = encode(T::KIND, entity)?;
        let sql = update_sql(T::TABLE, T::MUTABLE_COLUMNS, "t.id = $2 AND t.tenant_id = $3");
        let updated = self
            .execute(
                T::KIND,
                &sql,
                &[&value, &entity.resource_id(), &entity.tenant_id().as_uuid()],
            )
            .await?;
        if updated == 0 {
            return Err(StorageError::NotFound {
                kind: T::KIND,
                id: entity.resource_id(),
            });
        }
        Ok(())
    }

    async fn remove(&self, entity: &T) -> StorageResult<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1 AND tenant_id = $2", T::TABLE);
        let removed = self
            .execute(
                T::KIND,
                &sql,
                &[&entity.resource_id(), &entity.tenant_id().as_uuid()],
            )
            .await?;
        if removed == 0 {
            return Err(StorageError::NotFound {
                kind: T::KIND,
                id: entity.resource_id(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LookupStore for DbSession {
    async fn user_by_external_id(
        &self,
        tenant_id: TenantId,
        external_user_id: &str,
    ) -> StorageResult<Option<User>> {
        self.fetch_one(
            EntityKind::User,
            "SELECT row_to_json(t) FROM users t \
             WHERE t.tenant_id = $1 AND t.external_user_id = $2 AND t.deleted_at IS NULL",
            &[&tenant_id.as_uuid(), &external_user_id],
        )
        .await
    }

    async fn rate_limit_counter(
        &self,
        tenant_id: TenantId,
        resource_type: &str,
        period: LimitPeriod,
    ) -> StorageResult<Option<ApiRateLimit>> {
        self.fetch_one(
            EntityKind::ApiRateLimit,
            "SELECT row_to_json(t) FROM api_rate_limits t \
             WHERE t.tenant_id = $1 AND t.resource_type = $2 AND t.limit_period = $3 \
             AND t.deleted_at IS NULL \
             ORDER BY t.created_at, t.id LIMIT 1",
            &[&tenant_id.as_uuid(), &resource_type, &period.as_db_str()],
        )
        .await
    }

    async fn open_meeting_session(
        &self,
        tenant_id: TenantId,
        user_id: EntityId,
        recording_id: &str,
    ) -> StorageResult<Option<MeetingSession>> {
        self.fetch_one(
            EntityKind::MeetingSession,
            "SELECT row_to_json(t) FROM meeting_sessions t \
             WHERE t.tenant_id = $1 AND t.user_id = $2 AND t.recording_id = $3 \
             AND t.processing_status NOT IN ($4, $5) AND t.deleted_at IS NULL \
             ORDER BY t.created_at, t.id LIMIT 1",
            &[
                &tenant_id.as_uuid(),
                &user_id,
                &recording_id,
                &ProcessingStatus::Completed.as_db_str(),
                &ProcessingStatus::Failed.as_db_str(),
            ],
        )
        .await
    }
}
