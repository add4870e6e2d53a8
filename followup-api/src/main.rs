//! Followup API Server Entry Point
//!
//! Bootstraps configuration, connects to PostgreSQL, optionally warms the
//! tenant cache, and starts the Axum HTTP server.

use std::net::SocketAddr;

use axum::Router;
use followup_api::telemetry::{init_tracing, metrics, TelemetryConfig};
use followup_api::{create_router, ApiError, ApiResult, AppConfig, AppState, DbClient, DbConfig};
use followup_storage::Database;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let db_config = DbConfig::from_env();
    let db = DbClient::from_config(&db_config)?;

    if env_flag("FOLLOWUP_DB_MIGRATE") {
        db.migrate().await?;
    }

    let app_config = AppConfig::from_env()?;
    let preload = app_config.cache_preload;
    let state = AppState::from_config(db, app_config)?;

    if preload > 0 {
        let session = state.db.session().await?;
        match state.cache.preload(&session, preload).await {
            Ok(count) => {
                metrics::record_cache_operation("preload", true);
                tracing::info!(count, "Tenant cache warmed");
            }
            Err(e) => {
                metrics::record_cache_operation("preload", false);
                tracing::warn!(error = %e, "Tenant cache preload failed, continuing cold");
            }
        }
    }

    let app: Router = create_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting followup API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("FOLLOWUP_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("FOLLOWUP_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());

    let port = port_str.parse::<u16>().map_err(|_| {
        ApiError::invalid_input(format!("Invalid port value: {}", port_str))
    })?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>().map_err(|e| {
        ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e))
    })
}
