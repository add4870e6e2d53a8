//! Prometheus Metrics Definitions
//!
//! Defines the followup metrics and exposes a /metrics endpoint for
//! Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<FollowupMetrics>> = Lazy::new(FollowupMetrics::new);

/// Container for all followup metrics.
#[derive(Clone)]
pub struct FollowupMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Tenant resolutions - labels: source (cache/database/none), outcome
    pub tenant_resolutions_total: CounterVec,

    /// Tenant cache operations - labels: operation, result
    pub cache_operations_total: CounterVec,

    /// Security events - labels: event
    pub security_events_total: CounterVec,
}

impl FollowupMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "followup_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "followup_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            tenant_resolutions_total: register_counter_vec!(
                "followup_tenant_resolutions_total",
                "Tenant resolutions by load source and outcome",
                &["source", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register tenant_resolutions_total: {}", e)))?,

            cache_operations_total: register_counter_vec!(
                "followup_cache_operations_total",
                "Tenant cache administration operations",
                &["operation", "result"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_operations_total: {}", e)))?,

            security_events_total: register_counter_vec!(
                "followup_security_events_total",
                "Rejected signatures and cross-tenant access attempts",
                &["event"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register security_events_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_tenant_resolution(&self, source: &str, outcome: &str) {
        self.tenant_resolutions_total
            .with_label_values(&[source, outcome])
            .inc();
    }

    pub fn record_cache_operation(&self, operation: &str, success: bool) {
        let result = if success { "success" } else { "error" };
        self.cache_operations_total
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn record_security_event(&self, event: &str) {
        self.security_events_total.with_label_values(&[event]).inc();
    }
}

// Free-function forms for call sites that should not care whether
// registration succeeded.

pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(method, path, status, duration_secs);
    }
}

pub fn record_tenant_resolution(source: &str, outcome: &str) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_tenant_resolution(source, outcome);
    }
}

pub fn record_cache_operation(operation: &str, success: bool) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_cache_operation(operation, success);
    }
}

pub fn record_security_event(event: &str) {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_security_event(event);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        // Force initialization
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_tenant_resolution_counter() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let counter = metrics
            .tenant_resolutions_total
            .with_label_values(&["cache", "test_probe"]);
        let before = counter.get();
        record_tenant_resolution("cache", "test_probe");
        assert_eq!(counter.get(), before + 1.0);
        Ok(())
    }

    #[test]
    fn test_security_event_counter() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let counter = metrics.security_events_total.with_label_values(&["test_probe"]);
        let before = counter.get();
        record_security_event("test_probe");
        record_security_event("test_probe");
        assert_eq!(counter.get(), before + 2.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() -> Result<(), String> {
        record_http_request("POST", "/slack/commands", 200, 0.012);
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let text = String::from_utf8(body.to_vec()).map_err(|e| e.to_string())?;
        assert!(text.contains("followup_http_requests_total"));
        Ok(())
    }
}
