// ============================================================================
// Axum Middleware
// ============================================================================
//
// - request_logging: one structured line per completed request
// - request_context: request-id generation plus deadline enforcement; the id
//   is scoped task-locally so error envelopes can carry it, and is echoed in
//   the x-request-id response header
//
// ============================================================================

use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::context::AppContext;
use crate::error::AppError;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// The request id for the current task, when inside `request_context`.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

pub async fn request_logging(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    tracing::debug!(method = %method, path = %path, "incoming request");

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

/// Assign a request id and enforce the request deadline. A caller may shorten
/// (never extend) the deadline with the `x-request-timeout-ms` header;
/// exceeding it yields the 504 envelope and drops the in-flight handler.
pub async fn request_context(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let configured = ctx.config.request_timeout_ms;
    let deadline_ms = req
        .headers()
        .get("x-request-timeout-ms")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|requested| requested.min(configured))
        .unwrap_or(configured);

    let scoped = REQUEST_ID.scope(request_id.clone(), async {
        match tokio::time::timeout(Duration::from_millis(deadline_ms), next.run(req)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(deadline_ms, "request exceeded its deadline");
                AppError::Timeout.into_response()
            }
        }
    });

    let mut response = scoped.await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
