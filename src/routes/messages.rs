// ============================================================================
// Message Routes
// ============================================================================
//
// POST /api/v1/messages              - submit a message
// GET  /api/v1/messages/:id          - status + audit trail (no payload)
// GET  /api/v1/messages/:id/content  - decrypted content
// POST /api/v1/messages/:id/ack      - acknowledge receipt
//
// The submission pipeline is all-or-nothing: a failure at any step before
// the durable MESSAGE_SUBMITTED append leaves no queued record behind.
//
// ============================================================================

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{
    message_context, message_resource, AuditAction, AuditEvent, AuditEventType, AuditOutcome,
};
use crate::config::{MAX_CONTENT_SIZE, TTL_MAX_SECS, TTL_MIN_SECS};
use crate::context::AppContext;
use crate::error::AppError;
use crate::message::{Classification, MessageRecord, MessageStatus, MessageView, Precedence};
use crate::metrics;
use crate::queue::QueueError;
use crate::rate_limit::RateClass;
use crate::routes::extractors::AuthenticatedActor;
use crate::sealer::SealError;

// Precedence and classification arrive as strings so that out-of-set values
// produce the standard envelope and an SI VALIDATION_FAILURE event instead of
// a deserializer rejection.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub precedence: String,
    pub classification: String,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub ttl: i64,
}

struct ValidSubmission {
    precedence: Precedence,
    classification: Classification,
    sender: String,
    recipient: String,
    content: String,
    ttl: i64,
}

fn valid_node_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= 64 && value.chars().all(|c| c.is_ascii_graphic())
}

fn validate(request: SubmitRequest) -> Result<ValidSubmission, String> {
    let precedence = Precedence::parse(&request.precedence)
        .ok_or_else(|| format!("unknown precedence '{}'", request.precedence))?;
    let classification = Classification::parse(&request.classification)
        .ok_or_else(|| format!("unknown classification '{}'", request.classification))?;

    if !valid_node_id(&request.sender) {
        return Err("sender must be 1-64 printable ASCII characters".to_string());
    }
    if !valid_node_id(&request.recipient) {
        return Err("recipient must be 1-64 printable ASCII characters".to_string());
    }
    if request.content.is_empty() {
        return Err("content must not be empty".to_string());
    }
    if request.content.len() > MAX_CONTENT_SIZE {
        return Err(format!(
            "content exceeds maximum of {MAX_CONTENT_SIZE} bytes"
        ));
    }
    if !(TTL_MIN_SECS..=TTL_MAX_SECS).contains(&request.ttl) {
        return Err(format!(
            "ttl must be between {TTL_MIN_SECS} and {TTL_MAX_SECS} seconds"
        ));
    }

    Ok(ValidSubmission {
        precedence,
        classification,
        sender: request.sender,
        recipient: request.recipient,
        content: request.content,
        ttl: request.ttl,
    })
}

/// POST /api/v1/messages
pub async fn submit_message(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "message:send").await?;

    let submission = match validate(request) {
        Ok(submission) => submission,
        Err(reason) => {
            ctx.audit
                .emit(AuditEvent::new(
                    AuditEventType::ValidationFailure,
                    actor.audit_actor(),
                    AuditAction::new("SUBMIT", "message".to_string(), AuditOutcome::Failure)
                        .with_reason(reason.clone()),
                    serde_json::Value::Null,
                ))
                .await;
            return Err(AppError::validation(reason));
        }
    };

    if !actor.claims.may_act_as(&submission.sender) {
        ctx.audit
            .emit(AuditEvent::new(
                AuditEventType::PermissionDenied,
                actor.audit_actor(),
                AuditAction::new("SUBMIT", "message".to_string(), AuditOutcome::Failure)
                    .with_reason(format!(
                        "subject {} may not send as {}",
                        actor.claims.node_id, submission.sender
                    )),
                serde_json::Value::Null,
            ))
            .await;
        return Err(AppError::forbidden(format!(
            "subject may not act as sender '{}'",
            submission.sender
        )));
    }

    let rate_class = match submission.precedence {
        Precedence::Flash => RateClass::FlashSubmit,
        _ => RateClass::Submit,
    };
    actor.enforce_rate(&ctx, rate_class).await?;

    if !ctx.queue.admit(submission.precedence) {
        ctx.audit
            .emit(AuditEvent::new(
                AuditEventType::QueueFull,
                actor.audit_actor(),
                AuditAction::new("SUBMIT", "message".to_string(), AuditOutcome::Failure)
                    .with_reason(format!(
                        "{} partition at watermark",
                        submission.precedence
                    )),
                json!({ "precedence": submission.precedence }),
            ))
            .await;
        return Err(AppError::QueueFull {
            precedence: submission.precedence,
        });
    }

    let mut record = MessageRecord::new(
        submission.precedence,
        submission.classification,
        submission.sender,
        submission.recipient,
        Vec::new(),
        submission.ttl,
    );

    record.sealed_payload = match ctx
        .sealer
        .seal(
            submission.content.as_bytes(),
            submission.classification,
            &actor.audit_actor(),
            Some(record.id),
        )
        .await
    {
        Ok(sealed) => sealed,
        Err(e) => {
            internal_step_failure(&ctx, &actor, record.id, "seal", e);
            return Err(AppError::internal("payload sealing failed"));
        }
    };

    if let Err(e) = ctx.queue.enqueue(&record).await {
        internal_step_failure(&ctx, &actor, record.id, "enqueue", e);
        return Err(AppError::internal("failed to enqueue message"));
    }

    // Durable before the 201: a crash after this point must still show the
    // submission in the audit log.
    if let Err(e) = ctx
        .audit
        .append(AuditEvent::new(
            AuditEventType::MessageSubmitted,
            actor.audit_actor(),
            AuditAction::new(
                "SUBMIT",
                message_resource(record.id),
                AuditOutcome::Success,
            ),
            message_context(&record),
        ))
        .await
    {
        tracing::error!(message_id = %record.id, error = %e, "audit append failed, rolling back enqueue");
        if let Err(rollback) = ctx.queue.reject(record.id, MessageStatus::Failed).await {
            tracing::error!(message_id = %record.id, error = %rollback, "rollback failed");
        }
        return Err(AppError::internal("audit persistence failed"));
    }

    metrics::MESSAGES_TOTAL
        .with_label_values(&[record.precedence.as_str(), "QUEUED"])
        .inc();

    if record.precedence == Precedence::Flash {
        ctx.flash_signal.notify_one();
    }

    tracing::info!(
        message_id = %record.id,
        precedence = %record.precedence,
        sender = %record.sender,
        recipient = %record.recipient,
        ttl = record.ttl_seconds,
        "message submitted"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": record.id,
            "status": record.status,
            "precedence": record.precedence,
            "submitted_at": record.submitted_at,
            "expires_at": record.expires_at,
        })),
    ))
}

fn internal_step_failure<E: std::fmt::Display>(
    ctx: &Arc<AppContext>,
    actor: &AuthenticatedActor,
    message_id: Uuid,
    step: &'static str,
    error: E,
) {
    tracing::error!(message_id = %message_id, step, error = %error, "submission step failed");
    let ctx = ctx.clone();
    let event = AuditEvent::new(
        AuditEventType::InternalError,
        actor.audit_actor(),
        AuditAction::new("SUBMIT", message_resource(message_id), AuditOutcome::Failure)
            .with_reason(format!("{step} failed")),
        serde_json::Value::Null,
    );
    tokio::spawn(async move { ctx.audit.emit(event).await });
}

/// GET /api/v1/messages/:id
pub async fn get_status(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "message:read").await?;
    actor.enforce_rate(&ctx, RateClass::Read).await?;

    let record = ctx
        .queue
        .get(id)
        .await
        .map_err(queue_error)?
        .ok_or_else(|| AppError::not_found(format!("message {id} not found")))?;

    let trail: Vec<_> = ctx
        .audit
        .trail(id)
        .await
        .iter()
        .map(|e| e.as_ref().clone())
        .collect();

    Ok(Json(json!({
        "message": MessageView::from(&record),
        "audit_trail": trail,
    })))
}

/// GET /api/v1/messages/:id/content
///
/// RBAC plus classification ceiling: the subject's clearance must dominate
/// the message's label. The payload is opened here and nowhere else.
pub async fn get_content(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "message:read").await?;
    actor.enforce_rate(&ctx, RateClass::Read).await?;

    let record = ctx
        .queue
        .get(id)
        .await
        .map_err(queue_error)?
        .ok_or_else(|| AppError::not_found(format!("message {id} not found")))?;

    if actor.claims.classification_level < record.classification {
        ctx.audit
            .emit(AuditEvent::new(
                AuditEventType::PermissionDenied,
                actor.audit_actor(),
                AuditAction::new("READ_CONTENT", message_resource(id), AuditOutcome::Failure)
                    .with_reason(format!(
                        "clearance {} below {}",
                        actor.claims.classification_level, record.classification
                    )),
                serde_json::Value::Null,
            ))
            .await;
        return Err(AppError::forbidden(format!(
            "classification level {} required",
            record.classification
        )));
    }

    let plaintext = match ctx
        .sealer
        .open(&record.sealed_payload, &actor.audit_actor(), Some(id))
        .await
    {
        Ok(plaintext) => plaintext,
        Err(SealError::Integrity) | Err(SealError::TooShort(_)) => {
            // Fatal for the message: a payload that fails authentication will
            // never deliver correctly either.
            if !record.status.is_terminal() {
                if let Ok(failed) = ctx.queue.reject(id, MessageStatus::Failed).await {
                    ctx.audit
                        .emit(AuditEvent::new(
                            AuditEventType::MessageFailed,
                            crate::audit::AuditActor::system(),
                            AuditAction::new(
                                "DELIVER",
                                message_resource(id),
                                AuditOutcome::Failure,
                            )
                            .with_reason("payload integrity failure"),
                            message_context(&failed),
                        ))
                        .await;
                }
            }
            return Err(AppError::Integrity);
        }
        Err(e) => {
            tracing::error!(message_id = %id, error = %e, "payload open failed");
            return Err(AppError::Integrity);
        }
    };

    let content = String::from_utf8(plaintext)
        .map_err(|_| AppError::internal("decrypted content is not valid UTF-8"))?;

    Ok(Json(json!({
        "message_id": id,
        "content": content,
        "precedence": record.precedence,
        "classification": record.classification,
        "sender": record.sender,
        "recipient": record.recipient,
    })))
}

/// POST /api/v1/messages/:id/ack
///
/// Idempotent: acknowledging an already-delivered message returns the ack
/// record again without a second audit event (at-least-once delivery with
/// idempotent acknowledgment).
pub async fn acknowledge(
    State(ctx): State<Arc<AppContext>>,
    actor: AuthenticatedActor,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    actor.require(&ctx, "message:send").await?;

    let record = ctx
        .queue
        .get(id)
        .await
        .map_err(queue_error)?
        .ok_or_else(|| AppError::not_found(format!("message {id} not found")))?;

    let status = match record.status {
        MessageStatus::Delivered => MessageStatus::Delivered,
        MessageStatus::Queued | MessageStatus::InFlight => {
            let delivered = ctx.queue.ack(id).await.map_err(queue_error)?;
            ctx.audit
                .emit(AuditEvent::new(
                    AuditEventType::MessageDelivered,
                    actor.audit_actor(),
                    AuditAction::new("ACK", message_resource(id), AuditOutcome::Success)
                        .with_reason("recipient acknowledgment"),
                    message_context(&delivered),
                ))
                .await;
            metrics::MESSAGES_TOTAL
                .with_label_values(&[delivered.precedence.as_str(), "DELIVERED"])
                .inc();
            tracing::info!(
                message_id = %id,
                acknowledged_by = %actor.claims.node_id,
                "message acknowledged out-of-band"
            );
            MessageStatus::Delivered
        }
        terminal => {
            return Err(AppError::validation(format!(
                "cannot acknowledge message in terminal status {terminal}"
            )));
        }
    };

    Ok(Json(json!({
        "message_id": id,
        "acknowledged": true,
        "acknowledged_at": Utc::now(),
        "acknowledged_by": actor.claims.node_id,
        "status": status,
    })))
}

fn queue_error(e: QueueError) -> AppError {
    match e {
        QueueError::NotFound(id) => AppError::not_found(format!("message {id} not found")),
        other => AppError::internal(other.to_string()),
    }
}
