// ============================================================================
// Health & Observability Routes
// ============================================================================
//
// GET /health  - liveness
// GET /ready   - readiness (backing store reachable)
// GET /metrics - Prometheus text exposition
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::metrics;

/// GET /health
pub async fn health_check(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let store_ok = ctx.queue.ping().await.is_ok();
    let status = if store_ok { "healthy" } else { "degraded" };
    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "total_queued": ctx.queue.total_depth(),
            "audit_events": ctx.audit.count().await,
        })),
    )
}

/// GET /ready
pub async fn readiness_check(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    match ctx.queue.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ready": true }))),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ready": false, "reason": "queue store unreachable" })),
            )
        }
    }
}

/// GET /metrics
pub async fn metrics_endpoint() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to gather metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain; version=0.0.4")],
                String::new(),
            )
        }
    }
}
