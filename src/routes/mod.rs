// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: router assembly and middleware stack
// - auth.rs: token issuance
// - messages.rs: submission pipeline, status, content, acknowledgment
// - nodes.rs: node listing and heartbeat registration
// - audit.rs: audit retrieval, stats, export
// - queue.rs: depths and admin flush
// - health.rs: liveness, readiness, metrics
// - extractors.rs: bearer-token extractor and RBAC/quota helpers
// - middleware.rs: request logging, request ids, deadlines
//
// ============================================================================

mod audit;
mod auth;
mod extractors;
mod health;
mod messages;
pub mod middleware;
mod nodes;
mod queue;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the application router with all routes and middleware.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        // Health and observability (unauthenticated)
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics_endpoint))
        // Token issuance
        .route("/api/v1/auth/token", post(auth::issue_token))
        // Messages
        .route("/api/v1/messages", post(messages::submit_message))
        .route("/api/v1/messages/:id", get(messages::get_status))
        .route("/api/v1/messages/:id/content", get(messages::get_content))
        .route("/api/v1/messages/:id/ack", post(messages::acknowledge))
        // Nodes
        .route("/api/v1/nodes", get(nodes::list_nodes))
        .route("/api/v1/nodes/heartbeat", post(nodes::heartbeat))
        // Audit
        .route("/api/v1/audit/events", get(audit::query_events))
        .route("/api/v1/audit/stats", get(audit::stats))
        .route("/api/v1/audit/export", get(audit::export))
        // Queue
        .route("/api/v1/queue/status", get(queue::status))
        .route("/api/v1/queue/flush", post(queue::flush))
        // Middleware (last added runs first)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum::middleware::from_fn(middleware::request_logging))
                .into_inner(),
        )
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            middleware::request_context,
        ))
        .with_state(ctx)
}
