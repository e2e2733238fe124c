// ============================================================================
// Auth Routes
// ============================================================================
//
// POST /api/v1/auth/token - issue a bearer token for a role
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditActor, AuditEvent, AuditEventType, AuditOutcome};
use crate::auth::Role;
use crate::context::AppContext;
use crate::error::AppError;
use crate::message::Classification;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub role: Role,
    pub node_id: Option<String>,
    pub classification_level: Option<Classification>,
}

/// POST /api/v1/auth/token
pub async fn issue_token(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let node_id = request
        .node_id
        .unwrap_or_else(|| format!("node-{}", Uuid::new_v4()));
    let classification = request
        .classification_level
        .unwrap_or(Classification::Unclassified);

    if node_id.is_empty() || node_id.len() > 64 || !node_id.is_ascii() {
        return Err(AppError::validation(
            "node_id must be 1-64 ASCII characters",
        ));
    }

    let (token, claims) = ctx
        .auth
        .issue(&node_id, request.role, classification)
        .map_err(|e| AppError::internal(format!("token issuance failed: {e}")))?;

    ctx.audit
        .emit(AuditEvent::new(
            AuditEventType::TokenIssued,
            AuditActor {
                node_id: node_id.clone(),
                role: request.role.as_str().to_string(),
                source_address: None,
            },
            AuditAction::new(
                "ISSUE_TOKEN",
                format!("token:{}", claims.jti),
                AuditOutcome::Success,
            ),
            json!({ "classification_level": classification }),
        ))
        .await;

    tracing::info!(
        node_id = %node_id,
        role = request.role.as_str(),
        token_id = %claims.jti,
        "bearer token issued"
    );

    Ok((
        StatusCode::OK,
        Json(json!({
            "token": token,
            "token_type": "Bearer",
            "expires_at": claims.exp,
            "node_id": node_id,
            "role": request.role,
            "permissions": claims.permissions,
        })),
    ))
}
