//! End-to-end smoke tests against PostgreSQL.
//!
//! Run with `--features db-tests` and `FOLLOWUP_DB_*` pointing at a scratch
//! database.

#![cfg(feature = "db-tests")]

use std::sync::Arc;

use followup_api::{ApiResult, DbClient, DbConfig};
use followup_core::{NewUser, ScopeError, User};
use followup_storage::{
    context, create_scoped, get_scoped_by_id, scoped_query, Database, TenantCache, TenantStore,
};
use followup_test_utils::fixtures;
use uuid::Uuid;

async fn test_db() -> ApiResult<DbClient> {
    let config = DbConfig::from_env();
    let db = DbClient::from_config(&config)?;
    db.migrate().await?;
    Ok(db)
}

fn unique_team() -> String {
    format!("T{}", Uuid::now_v7().simple()).to_uppercase()
}

#[tokio::test]
async fn smoke_test_tenant_isolation_round_trip() -> ApiResult<()> {
    let db = test_db().await?;
    let session = db.session().await?;

    let a = fixtures::active_tenant(&unique_team());
    let b = fixtures::active_tenant(&unique_team());
    session.insert_tenant(&a).await?;
    session.insert_tenant(&b).await?;

    let cache = TenantCache::store_only();
    let resolved = cache
        .get_or_load(&a.external_id, &session)
        .await
        .map_err(followup_api::ApiError::from)?;
    assert_eq!(resolved.tenant.id, a.id);

    let user: User = context::with_tenant(Arc::new(a.clone()), async {
        create_scoped(&session, NewUser::new("U0001")).await
    })
    .await??;
    assert_eq!(user.tenant_id, a.id);

    let denied = context::with_tenant(Arc::new(b.clone()), async {
        get_scoped_by_id::<User, _>(&session, user.id).await
    })
    .await?;
    assert!(matches!(denied, Err(ScopeError::AccessDenied { .. })));

    let visible = context::with_tenant(Arc::new(b), async {
        scoped_query::<User, _>(&session)?.count().await
    })
    .await??;
    assert_eq!(visible, 0);

    Ok(())
}
