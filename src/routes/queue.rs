// ============================================================================
// Queue Routes
// ============================================================================
//
// GET  /api/v1/queue/status - per-partition depths
// POST /api/v1/queue/flush  - force an immediate dispatch pass (admin)
//
// ============================================================================

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;
use crate::message::Precedence;
use crate::rate_limit::RateClass;
use crate::routes::extractors::AuthenticatedActor;

/// GET /api/v1/queue/status
pub async fn status(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "node:status").await?;
    actor.enforce_rate(&ctx, RateClass::Read).await?;

    let mut queues = serde_json::Map::new();
    for precedence in Precedence::ALL {
        queues.insert(
            precedence.as_str().to_string(),
            json!({ "depth": ctx.queue.depth(precedence) }),
        );
    }

    Ok(Json(json!({
        "queues": queues,
        "total_queued": ctx.queue.total_depth(),
    })))
}

/// POST /api/v1/queue/flush
///
/// Runs one full dispatch pass inline and reports what it moved. Serialized
/// against the background worker, so partition FIFO is preserved.
pub async fn flush(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "node:manage").await?;

    let stats = ctx
        .dispatcher
        .run_tick()
        .await
        .map_err(|e| AppError::internal(format!("flush failed: {e}")))?;

    tracing::info!(
        flushed = stats.delivered,
        failed = stats.failed,
        requeued = stats.requeued,
        expired = stats.expired,
        "queue flush requested"
    );

    Ok(Json(json!({
        "flushed": stats.delivered,
        "failed": stats.failed,
        "requeued": stats.requeued,
        "expired": stats.expired,
        "status": "COMPLETED",
    })))
}
