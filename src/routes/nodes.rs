// ============================================================================
// Node Routes
// ============================================================================
//
// GET  /api/v1/nodes           - list nodes with derived liveness status
// POST /api/v1/nodes/heartbeat - register/refresh the caller's delivery
//                                address and advertised capabilities
//
// ============================================================================

use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::message::Precedence;
use crate::nodes::NodeStatus;
use crate::rate_limit::RateClass;
use crate::routes::extractors::AuthenticatedActor;

/// GET /api/v1/nodes
pub async fn list_nodes(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "node:status").await?;
    actor.enforce_rate(&ctx, RateClass::Read).await?;

    let nodes = ctx.nodes.list().await;
    let connected = nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Connected)
        .count();

    Ok(Json(json!({
        "nodes": nodes,
        "total": nodes.len(),
        "connected": connected,
        "disconnected": nodes.len() - connected,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub address: Option<String>,
    pub capabilities: Option<Vec<Precedence>>,
}

/// POST /api/v1/nodes/heartbeat
///
/// A node registers itself; the identity is the token's node_id, never a
/// field of the body.
pub async fn heartbeat(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
    Json(request): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "node:status").await?;

    if let Some(ref address) = request.address {
        if address.is_empty() || address.len() > 256 {
            return Err(AppError::validation(
                "address must be 1-256 characters when present",
            ));
        }
    }

    let node_id = actor.claims.node_id.clone();
    ctx.nodes
        .register(&node_id, request.address, request.capabilities)
        .await;

    tracing::debug!(node_id = %node_id, "node heartbeat registered");

    Ok(Json(json!({
        "node_id": node_id,
        "registered": true,
    })))
}
