// ============================================================================
// Axum Extractors
// ============================================================================
//
// AuthenticatedActor verifies the bearer token on every request (zero trust),
// bumps the node's liveness record, and carries the verified claims into the
// handler. Authorization and quota checks live here too so every handler
// states its requirements in one line.
//
// ============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;

use crate::audit::{AuditAction, AuditActor, AuditEvent, AuditEventType, AuditOutcome};
use crate::auth::Claims;
use crate::context::AppContext;
use crate::error::AppError;
use crate::metrics;
use crate::rate_limit::RateClass;

#[derive(Debug, Clone)]
pub struct AuthenticatedActor {
    pub claims: Claims,
    pub source_address: Option<String>,
}

impl AuthenticatedActor {
    pub fn audit_actor(&self) -> AuditActor {
        AuditActor {
            node_id: self.claims.node_id.clone(),
            role: self.claims.role.as_str().to_string(),
            source_address: self.source_address.clone(),
        }
    }

    /// RBAC gate. Every check is audited: granted checks as AC `RBAC_CHECK`,
    /// denials as AC `PERMISSION_DENIED`.
    pub async fn require(&self, ctx: &AppContext, permission: &str) -> Result<(), AppError> {
        if self.claims.has_permission(permission) {
            ctx.audit
                .emit(AuditEvent::new(
                    AuditEventType::RbacCheck,
                    self.audit_actor(),
                    AuditAction::new("RBAC_CHECK", permission.to_string(), AuditOutcome::Success),
                    serde_json::Value::Null,
                ))
                .await;
            Ok(())
        } else {
            ctx.audit
                .emit(AuditEvent::new(
                    AuditEventType::PermissionDenied,
                    self.audit_actor(),
                    AuditAction::new("RBAC_CHECK", permission.to_string(), AuditOutcome::Failure)
                        .with_reason(format!("role {} lacks {permission}", self.claims.role.as_str())),
                    serde_json::Value::Null,
                ))
                .await;
            Err(AppError::forbidden(format!(
                "permission '{permission}' required"
            )))
        }
    }

    /// Count this request against the token's quota for the class; exceeding
    /// it is audited as AC `RATE_LIMIT_VIOLATION` and surfaced as 429.
    pub async fn enforce_rate(&self, ctx: &AppContext, class: RateClass) -> Result<(), AppError> {
        match ctx.limiter.check(&self.claims.jti, class).await {
            Ok(()) => Ok(()),
            Err(exceeded) => {
                ctx.audit
                    .emit(AuditEvent::new(
                        AuditEventType::RateLimitViolation,
                        self.audit_actor(),
                        AuditAction::new(
                            "RATE_LIMIT",
                            format!("quota:{}", exceeded.class),
                            AuditOutcome::Failure,
                        )
                        .with_reason(format!("limit {} per minute", exceeded.limit)),
                        serde_json::Value::Null,
                    ))
                    .await;
                Err(AppError::RateLimited {
                    message: format!(
                        "rate limit exceeded: maximum {} {} requests per minute",
                        exceeded.limit, exceeded.class
                    ),
                    retry_after_secs: exceeded.retry_after_secs,
                })
            }
        }
    }
}

fn client_address(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for AuthenticatedActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        ctx: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let source_address = client_address(parts);

        let auth_header = match parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(value) => value,
            None => {
                reject(ctx, source_address.clone(), "missing").await;
                return Err(AppError::auth("Authorization header required"));
            }
        };

        let Some(token) = auth_header.strip_prefix("Bearer ") else {
            reject(ctx, source_address.clone(), "malformed").await;
            return Err(AppError::auth(
                "invalid Authorization header format, use 'Bearer <token>'",
            ));
        };

        let claims = match ctx.auth.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                reject(ctx, source_address.clone(), e.reason()).await;
                return Err(AppError::invalid_token(e.reason()));
            }
        };

        // Any authenticated request counts as a liveness signal.
        ctx.nodes.observe(&claims.node_id).await;

        ctx.audit
            .emit(AuditEvent::new(
                AuditEventType::AuthSuccess,
                AuditActor {
                    node_id: claims.node_id.clone(),
                    role: claims.role.as_str().to_string(),
                    source_address: source_address.clone(),
                },
                AuditAction::new(
                    "AUTHENTICATE",
                    format!("token:{}", claims.jti),
                    AuditOutcome::Success,
                ),
                serde_json::Value::Null,
            ))
            .await;

        Ok(AuthenticatedActor {
            claims,
            source_address,
        })
    }
}

async fn reject(ctx: &AppContext, source_address: Option<String>, reason: &str) {
    metrics::AUTH_FAILURES.with_label_values(&[reason]).inc();
    ctx.audit
        .emit(AuditEvent::new(
            AuditEventType::AuthFailure,
            AuditActor {
                node_id: "unknown".to_string(),
                role: "unknown".to_string(),
                source_address,
            },
            AuditAction::new("AUTHENTICATE", "token".to_string(), AuditOutcome::Failure)
                .with_reason(reason.to_string()),
            serde_json::Value::Null,
        ))
        .await;
}
