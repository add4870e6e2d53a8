//! Probes for the orchestrator.
//!
//! - `/health/ping` answers `pong`
//! - `/health/live` reports the process is up
//! - `/health/ready` probes the store and the tenant cache
//!
//! All three are whitelisted, so no tenant is resolved and no store session
//! is opened by the middleware.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use followup_storage::{CacheStats, Database};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Body of every probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ReadinessDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessDetails {
    pub database: StoreProbe,
    /// Absent when caching is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheProbe>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProbe {
    pub status: ProbeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreProbe {
    async fn run<D: Database>(db: &D) -> Self {
        let started = Instant::now();
        match db.ping().await {
            Ok(()) => Self {
                status: ProbeStatus::Healthy,
                latency_ms: Some(started.elapsed().as_millis() as u64),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "store probe failed");
                Self {
                    status: ProbeStatus::Unhealthy,
                    latency_ms: None,
                    error: Some("store unreachable".to_string()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheProbe {
    pub status: ProbeStatus,
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub hit_rate: f64,
}

impl CacheProbe {
    /// A silent backend only degrades readiness; lookups fall back to the store.
    fn from_stats(stats: Option<CacheStats>) -> Self {
        match stats {
            Some(stats) => Self {
                status: ProbeStatus::Healthy,
                hit_rate: stats.hit_rate(),
                hits: stats.hits,
                misses: stats.misses,
                entries: stats.entry_count,
            },
            None => Self {
                status: ProbeStatus::Degraded,
                hits: 0,
                misses: 0,
                entries: 0,
                hit_rate: 0.0,
            },
        }
    }
}

/// The store decides readiness; the cache can only degrade it.
fn overall(store: ProbeStatus, cache: Option<ProbeStatus>) -> ProbeStatus {
    match (store, cache) {
        (ProbeStatus::Healthy, Some(ProbeStatus::Healthy) | None) => ProbeStatus::Healthy,
        (ProbeStatus::Healthy, Some(_)) => ProbeStatus::Degraded,
        _ => ProbeStatus::Unhealthy,
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

pub async fn ping() -> &'static str {
    "pong"
}

pub async fn liveness() -> Json<ProbeReport> {
    Json(ProbeReport {
        status: ProbeStatus::Healthy,
        message: Some("alive".to_string()),
        details: None,
    })
}

/// GET /health/ready
pub async fn readiness<D: Database>(State(state): State<AppState<D>>) -> impl IntoResponse {
    let database = StoreProbe::run(&state.db).await;

    let cache = if state.cache.config().enabled {
        let stats = state.cache.stats().await;
        metrics::record_cache_operation("stats", stats.is_some());
        Some(CacheProbe::from_stats(stats))
    } else {
        None
    };

    let status = overall(database.status, cache.as_ref().map(|c| c.status));
    let code = match status {
        ProbeStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    let report = ProbeReport {
        status,
        message: None,
        details: Some(ReadinessDetails {
            database,
            cache,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };
    (code, Json(report))
}

pub fn create_router<D: Database>() -> Router<AppState<D>> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness::<D>))
}
