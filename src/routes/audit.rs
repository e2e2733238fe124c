// ============================================================================
// Audit Routes
// ============================================================================
//
// GET /api/v1/audit/events - filtered retrieval, newest-first
// GET /api/v1/audit/stats  - aggregates by family, outcome, actor
// GET /api/v1/audit/export - full JSONL export (admin)
//
// Retrieval requires `audit:read` (supervisor and above); anonymous access
// is rejected like every other authenticated endpoint. Unknown filter values
// yield an empty result set rather than an error.
//
// ============================================================================

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditEventType, AuditQuery, ControlFamily};
use crate::context::AppContext;
use crate::error::AppError;
use crate::rate_limit::RateClass;
use crate::routes::extractors::AuthenticatedActor;

#[derive(Debug, Deserialize)]
pub struct AuditEventsParams {
    pub control_family: Option<String>,
    pub event_type: Option<String>,
    pub node_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// GET /api/v1/audit/events
pub async fn query_events(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
    Query(params): Query<AuditEventsParams>,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "audit:read").await?;
    actor.enforce_rate(&ctx, RateClass::Read).await?;

    // An unknown family or type matches nothing by definition.
    let mut unknown_filter = false;
    let control_family = match params.control_family.as_deref() {
        Some(raw) => match ControlFamily::parse(raw) {
            Some(family) => Some(family),
            None => {
                unknown_filter = true;
                None
            }
        },
        None => None,
    };
    let event_type = match params.event_type.as_deref() {
        Some(raw) => match AuditEventType::parse(raw) {
            Some(event_type) => Some(event_type),
            None => {
                unknown_filter = true;
                None
            }
        },
        None => None,
    };

    let events: Vec<crate::audit::AuditEvent> = if unknown_filter {
        Vec::new()
    } else {
        ctx.audit
            .query(&AuditQuery {
                control_family,
                event_type,
                node_id: params.node_id,
                start_time: params.start_time,
                end_time: params.end_time,
                limit: params.limit,
            })
            .await
            .iter()
            .map(|e| e.as_ref().clone())
            .collect()
    };

    let total = ctx.audit.count().await;
    let filtered = events.len();
    Ok(Json(json!({
        "events": events,
        "total": total,
        "filtered": filtered,
    })))
}

/// GET /api/v1/audit/stats
pub async fn stats(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "audit:read").await?;
    actor.enforce_rate(&ctx, RateClass::Read).await?;

    Ok(Json(ctx.audit.stats().await))
}

/// GET /api/v1/audit/export
pub async fn export(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "audit:export").await?;

    let body = ctx
        .audit
        .export_jsonl()
        .await
        .map_err(|e| AppError::internal(format!("audit export failed: {e}")))?;

    let filename = format!(
        "audit-export-{}.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    Ok((
        [
            ("content-type", "application/x-ndjson".to_string()),
            (
                "content-disposition",
                format!("attachment; filename={filename}"),
            ),
        ],
        body,
    ))
}
