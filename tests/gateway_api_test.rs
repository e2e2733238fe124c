// Gateway surface tests: authentication, RBAC, validation, backpressure,
// rate limiting, content retrieval, acknowledgment, and observability.

use chrono::Duration;
use reqwest::StatusCode;

use tacedge::audit::{AuditEventType, AuditQuery};
use tacedge::auth::Role;
use tacedge::message::{Classification, Precedence};

mod test_utils;
use test_utils::{spawn_app, test_config};

async fn body(response: reqwest::Response) -> serde_json::Value {
    response.json().await.unwrap()
}

#[tokio::test]
async fn submit_returns_created_with_queued_status() {
    let app = spawn_app(test_config()).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    let response = app
        .submit(&token, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "contact report", 300)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body(response).await;
    assert_eq!(body["status"], "QUEUED");
    assert!(body["id"].is_string());
    assert!(body["submitted_at"].is_string());

    assert_eq!(app.ctx.queue.depth(Precedence::Flash), 1);

    let submitted = app
        .ctx
        .audit
        .query(&AuditQuery {
            event_type: Some(AuditEventType::MessageSubmitted),
            ..Default::default()
        })
        .await;
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].actor.node_id, "NODE-ALPHA");
    assert_eq!(submitted[0].context["precedence"], "FLASH");
    assert_eq!(submitted[0].context["classification"], "UNCLASSIFIED");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = spawn_app(test_config()).await;

    let response = app
        .client
        .get(app.url("/api/v1/nodes"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert!(body["error"]["request_id"].is_string());
}

#[tokio::test]
async fn expired_token_is_rejected_and_audited() {
    let app = spawn_app(test_config()).await;
    let (token, _) = app
        .ctx
        .auth
        .issue_with_ttl(
            "NODE-ALPHA",
            Role::Operator,
            Classification::Unclassified,
            Duration::seconds(-120),
        )
        .unwrap();

    let response = app
        .submit(&token, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "late", 300)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body(response).await;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    // Queue untouched, failure audited with the expiry reason
    assert_eq!(app.ctx.queue.total_depth(), 0);
    let failures = app
        .ctx
        .audit
        .query(&AuditQuery {
            event_type: Some(AuditEventType::AuthFailure),
            ..Default::default()
        })
        .await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].action.reason.as_deref(), Some("expired"));
}

#[tokio::test]
async fn operator_cannot_read_audit_supervisor_can() {
    let app = spawn_app(test_config()).await;
    let operator = app.token_for(Role::Operator, "NODE-ALPHA").await;
    let supervisor = app.token_for(Role::Supervisor, "NODE-HQ").await;

    let denied = app
        .client
        .get(app.url("/api/v1/audit/events"))
        .bearer_auth(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    assert_eq!(body(denied).await["error"]["code"], "FORBIDDEN");

    let denials = app
        .ctx
        .audit
        .query(&AuditQuery {
            event_type: Some(AuditEventType::PermissionDenied),
            ..Default::default()
        })
        .await;
    assert_eq!(denials.len(), 1);

    let allowed = app
        .client
        .get(app.url("/api/v1/audit/events?control_family=AC"))
        .bearer_auth(&supervisor)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let listing = body(allowed).await;
    assert!(listing["filtered"].as_u64().unwrap() >= 1);

    // Unknown filter values match nothing rather than failing
    let unknown = app
        .client
        .get(app.url("/api/v1/audit/events?control_family=XX"))
        .bearer_auth(&supervisor)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::OK);
    assert_eq!(body(unknown).await["filtered"], 0);
}

#[tokio::test]
async fn out_of_set_and_out_of_range_fields_are_rejected() {
    let app = spawn_app(test_config()).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    for (precedence, ttl, content) in [
        ("URGENT", 300, "x".to_string()),
        ("FLASH", 0, "x".to_string()),
        ("FLASH", 86_401, "x".to_string()),
        ("FLASH", 300, "x".repeat(64 * 1024 + 1)),
        ("FLASH", 300, String::new()),
    ] {
        let response = app
            .submit(&token, precedence, "NODE-ALPHA", "NODE-BRAVO", &content, ttl)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    assert_eq!(app.ctx.queue.total_depth(), 0);
    let failures = app
        .ctx
        .audit
        .query(&AuditQuery {
            event_type: Some(AuditEventType::ValidationFailure),
            ..Default::default()
        })
        .await;
    assert_eq!(failures.len(), 5);
}

#[tokio::test]
async fn operator_may_not_impersonate_another_sender() {
    let app = spawn_app(test_config()).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    let response = app
        .submit(&token, "FLASH", "NODE-BRAVO", "NODE-CHARLIE", "spoofed", 300)
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.ctx.queue.total_depth(), 0);
}

#[tokio::test]
async fn watermark_backpressure_returns_queue_full_without_side_effects() {
    let mut config = test_config();
    config.watermarks.flash = 2;
    let app = spawn_app(config).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    for _ in 0..2 {
        let accepted = app
            .submit(&token, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "fits", 300)
            .await;
        assert_eq!(accepted.status(), StatusCode::CREATED);
    }

    let rejected = app
        .submit(&token, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "overflow", 300)
        .await;
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body(rejected).await;
    assert_eq!(body["error"]["code"], "QUEUE_FULL");

    // No enqueue, no MESSAGE_SUBMITTED for the rejected one, existing
    // messages untouched.
    assert_eq!(app.ctx.queue.depth(Precedence::Flash), 2);
    let submitted = app
        .ctx
        .audit
        .query(&AuditQuery {
            event_type: Some(AuditEventType::MessageSubmitted),
            ..Default::default()
        })
        .await;
    assert_eq!(submitted.len(), 2);
    let full = app
        .ctx
        .audit
        .query(&AuditQuery {
            event_type: Some(AuditEventType::QueueFull),
            ..Default::default()
        })
        .await;
    assert_eq!(full.len(), 1);
}

#[tokio::test]
async fn per_token_flash_quota_yields_rate_limited() {
    let mut config = test_config();
    config.rate_limits.flash_per_minute = 2;
    let app = spawn_app(config).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    for _ in 0..2 {
        let accepted = app
            .submit(&token, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "within quota", 300)
            .await;
        assert_eq!(accepted.status(), StatusCode::CREATED);
    }

    let limited = app
        .submit(&token, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "over quota", 300)
        .await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body(limited).await;
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert!(body["error"]["details"]["retry_after_secs"].as_i64().unwrap() >= 1);

    // A fresh token has its own windows
    let other = app.token_for(Role::Operator, "NODE-ALPHA").await;
    let accepted = app
        .submit(&other, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "new token", 300)
        .await;
    assert_eq!(accepted.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn status_view_includes_trail_and_hides_payload() {
    let app = spawn_app(test_config()).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    let submitted = app
        .submit(&token, "PRIORITY", "NODE-ALPHA", "NODE-BRAVO", "sitrep", 300)
        .await;
    let id = body(submitted).await["id"].as_str().unwrap().to_string();

    let response = app
        .client
        .get(app.url(&format!("/api/v1/messages/{id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body(response).await;
    assert_eq!(body["message"]["status"], "QUEUED");
    assert_eq!(body["message"]["precedence"], "PRIORITY");
    assert!(body["message"].get("sealed_payload").is_none());
    assert!(body["message"].get("content").is_none());

    let trail = body["audit_trail"].as_array().unwrap();
    assert!(trail
        .iter()
        .any(|e| e["event_type"] == "MESSAGE_SUBMITTED"));

    let missing = app
        .client
        .get(app.url(&format!("/api/v1/messages/{}", uuid::Uuid::new_v4())))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn content_roundtrips_under_the_classification_ceiling() {
    let app = spawn_app(test_config()).await;
    let sender = app
        .token_with_classification(Role::Operator, "NODE-ALPHA", "SECRET")
        .await;

    let submitted = app
        .client
        .post(app.url("/api/v1/messages"))
        .bearer_auth(&sender)
        .json(&serde_json::json!({
            "precedence": "IMMEDIATE",
            "classification": "SECRET",
            "sender": "NODE-ALPHA",
            "recipient": "NODE-BRAVO",
            "content": "grid 31U FT 1234 5678",
            "ttl": 600,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status(), StatusCode::CREATED);
    let id = body(submitted).await["id"].as_str().unwrap().to_string();

    // Insufficient clearance: denied without plaintext
    let low = app
        .token_with_classification(Role::Supervisor, "NODE-HQ", "CONFIDENTIAL")
        .await;
    let denied = app
        .client
        .get(app.url(&format!("/api/v1/messages/{id}/content")))
        .bearer_auth(&low)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let denied_body = body(denied).await;
    assert!(!denied_body.to_string().contains("grid 31U"));

    // Sufficient clearance: the original content comes back
    let cleared = app
        .token_with_classification(Role::Supervisor, "NODE-HQ", "TOP_SECRET")
        .await;
    let allowed = app
        .client
        .get(app.url(&format!("/api/v1/messages/{id}/content")))
        .bearer_auth(&cleared)
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let allowed_body = body(allowed).await;
    assert_eq!(allowed_body["content"], "grid 31U FT 1234 5678");
    assert_eq!(allowed_body["classification"], "SECRET");
}

#[tokio::test]
async fn acknowledgment_is_idempotent() {
    let app = spawn_app(test_config()).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;
    let recipient = app.token_for(Role::Operator, "NODE-BRAVO").await;

    let submitted = app
        .submit(&token, "ROUTINE", "NODE-ALPHA", "NODE-BRAVO", "supply list", 600)
        .await;
    let id = body(submitted).await["id"].as_str().unwrap().to_string();

    let first = app
        .client
        .post(app.url(&format!("/api/v1/messages/{id}/ack")))
        .bearer_auth(&recipient)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = body(first).await;
    assert_eq!(first_body["acknowledged"], true);
    assert_eq!(first_body["status"], "DELIVERED");
    assert_eq!(app.ctx.queue.total_depth(), 0);

    let second = app
        .client
        .post(app.url(&format!("/api/v1/messages/{id}/ack")))
        .bearer_auth(&recipient)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);

    // Exactly one terminal MESSAGE_DELIVERED event despite two acks
    let delivered_events = app
        .ctx
        .audit
        .trail(id.parse().unwrap())
        .await
        .iter()
        .filter(|e| e.event_type == AuditEventType::MessageDelivered)
        .count();
    assert_eq!(delivered_events, 1);

    let unknown = app
        .client
        .post(app.url(&format!("/api/v1/messages/{}/ack", uuid::Uuid::new_v4())))
        .bearer_auth(&recipient)
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeat_registers_and_nodes_listing_reports_liveness() {
    let app = spawn_app(test_config()).await;
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;

    let response = app
        .client
        .post(app.url("/api/v1/nodes/heartbeat"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "address": "http://10.0.1.50:9000",
            "capabilities": ["FLASH", "IMMEDIATE"],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let listing = app
        .client
        .get(app.url("/api/v1/nodes"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let listing = body(listing).await;
    assert_eq!(listing["total"], 1);
    assert_eq!(listing["connected"], 1);
    let node = &listing["nodes"][0];
    assert_eq!(node["node_id"], "NODE-ALPHA");
    assert_eq!(node["status"], "CONNECTED");
    assert_eq!(node["capabilities"], serde_json::json!(["FLASH", "IMMEDIATE"]));
}

#[tokio::test]
async fn queue_status_and_admin_flush() {
    let app = spawn_app(test_config()).await;
    let operator = app.token_for(Role::Operator, "NODE-ALPHA").await;
    let admin = app.token_for(Role::Admin, "NODE-HQ").await;

    app.submit(&operator, "FLASH", "NODE-ALPHA", "NODE-BRAVO", "one", 300)
        .await;
    app.submit(&operator, "ROUTINE", "NODE-ALPHA", "NODE-CHARLIE", "two", 300)
        .await;

    let status = app
        .client
        .get(app.url("/api/v1/queue/status"))
        .bearer_auth(&operator)
        .send()
        .await
        .unwrap();
    let status = body(status).await;
    assert_eq!(status["queues"]["FLASH"]["depth"], 1);
    assert_eq!(status["queues"]["ROUTINE"]["depth"], 1);
    assert_eq!(status["total_queued"], 2);

    // Flush is admin-only
    let denied = app
        .client
        .post(app.url("/api/v1/queue/flush"))
        .bearer_auth(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let flushed = app
        .client
        .post(app.url("/api/v1/queue/flush"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(flushed.status(), StatusCode::OK);
    let flushed = body(flushed).await;
    assert_eq!(flushed["flushed"], 2);
    assert_eq!(flushed["status"], "COMPLETED");
    assert_eq!(app.ctx.queue.total_depth(), 0);
}

#[tokio::test]
async fn health_ready_and_metrics_respond() {
    let app = spawn_app(test_config()).await;

    // Touch the pipeline so the lazily registered collectors exist
    let token = app.token_for(Role::Operator, "NODE-ALPHA").await;
    app.submit(&token, "ROUTINE", "NODE-ALPHA", "NODE-BRAVO", "ping", 300)
        .await;

    let health = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body(health).await["status"], "healthy");

    let ready = app.client.get(app.url("/ready")).send().await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    let metrics = app.client.get(app.url("/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = metrics.text().await.unwrap();
    assert!(text.contains("tacedge_"));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = spawn_app(test_config()).await;

    let response = app
        .client
        .get(app.url("/api/v1/nodes"))
        .send()
        .await
        .unwrap();
    let header_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("missing x-request-id header");
    let envelope_id = body(response).await["error"]["request_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(header_id, envelope_id);
}
