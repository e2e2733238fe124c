// Shared harness for integration tests: spawns the gateway on an ephemeral
// port with the in-process store and a scriptable transport.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};

use tacedge::config::{Config, DispatchConfig, RateLimitConfig, WatermarkConfig};
use tacedge::context::AppContext;
use tacedge::message::Precedence;
use tacedge::routes::create_router;
use tacedge::store::MemoryListStore;
use tacedge::transport::{DeliveryOutcome, NodeTransport};
use tacedge::{build_context, auth::Role};

pub const TEST_SIGNING_KEY: &str = "a1b2c3d4e5f6g7h8i9j0k1l2m3n4o5p6q7r8s9t0";
pub const TEST_SEALING_KEY: &str =
    "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// Transport double: records every attempt, delivers by default, and can be
/// scripted to fail per recipient (once or always).
pub struct ScriptedTransport {
    pub attempts: Mutex<Vec<String>>,
    pub delivered: Mutex<Vec<String>>,
    scripted_failures: Mutex<HashMap<String, VecDeque<DeliveryOutcome>>>,
    always_transient: Mutex<HashSet<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(HashMap::new()),
            always_transient: Mutex::new(HashSet::new()),
        }
    }

    /// Queue one scripted outcome for the next attempt to this recipient.
    pub async fn fail_next(&self, recipient: &str, outcome: DeliveryOutcome) {
        self.scripted_failures
            .lock()
            .await
            .entry(recipient.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Every attempt to this recipient fails transiently (unreachable node).
    pub async fn set_unreachable(&self, recipient: &str) {
        self.always_transient
            .lock()
            .await
            .insert(recipient.to_string());
    }

    pub async fn delivered_order(&self) -> Vec<String> {
        self.delivered.lock().await.clone()
    }

    pub async fn attempt_count(&self, recipient: &str) -> usize {
        self.attempts
            .lock()
            .await
            .iter()
            .filter(|r| r.as_str() == recipient)
            .count()
    }
}

#[async_trait]
impl NodeTransport for ScriptedTransport {
    async fn deliver(
        &self,
        recipient: &str,
        _sealed_payload: &[u8],
        _precedence: Precedence,
    ) -> DeliveryOutcome {
        self.attempts.lock().await.push(recipient.to_string());

        if self.always_transient.lock().await.contains(recipient) {
            return DeliveryOutcome::Transient("recipient unreachable".to_string());
        }
        if let Some(planned) = self.scripted_failures.lock().await.get_mut(recipient) {
            if let Some(outcome) = planned.pop_front() {
                return outcome;
            }
        }

        self.delivered.lock().await.push(recipient.to_string());
        DeliveryOutcome::Delivered
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        token_signing_key: TEST_SIGNING_KEY.to_string(),
        content_encryption_key: TEST_SEALING_KEY.to_string(),
        key_version: 1,
        token_ttl_hours: 24,
        heartbeat_threshold_secs: 60,
        request_timeout_ms: 5_000,
        // A long tick keeps the background worker quiet; tests drive
        // run_tick deterministically or wake it through the flash signal.
        dispatch: DispatchConfig {
            tick_ms: 10_000,
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
            attempt_timeout_flash_ms: 5_000,
            attempt_timeout_other_ms: 5_000,
        },
        watermarks: WatermarkConfig {
            flash: 100,
            immediate: 1_000,
            priority: 10_000,
            routine: 100_000,
        },
        rate_limits: RateLimitConfig {
            flash_per_minute: 100,
            submit_per_minute: 1_000,
            reads_per_minute: 5_000,
        },
        redis_url: None,
        audit_dir: None,
        seed_nodes: Vec::new(),
    }
}

pub struct TestApp {
    pub address: String,
    pub ctx: Arc<AppContext>,
    pub transport: Arc<ScriptedTransport>,
    pub client: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    /// Issue a token through the public endpoint.
    pub async fn token_for(&self, role: Role, node_id: &str) -> String {
        self.token_with_classification(role, node_id, "UNCLASSIFIED")
            .await
    }

    pub async fn token_with_classification(
        &self,
        role: Role,
        node_id: &str,
        classification: &str,
    ) -> String {
        let response = self
            .client
            .post(self.url("/api/v1/auth/token"))
            .json(&serde_json::json!({
                "role": role,
                "node_id": node_id,
                "classification_level": classification,
            }))
            .send()
            .await
            .expect("token request failed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn submit(
        &self,
        token: &str,
        precedence: &str,
        sender: &str,
        recipient: &str,
        content: &str,
        ttl: i64,
    ) -> reqwest::Response {
        self.client
            .post(self.url("/api/v1/messages"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "precedence": precedence,
                "classification": "UNCLASSIFIED",
                "sender": sender,
                "recipient": recipient,
                "content": content,
                "ttl": ttl,
            }))
            .send()
            .await
            .expect("submit request failed")
    }

    /// Run one dispatch pass inline (deterministic alternative to waiting
    /// for the worker tick).
    pub async fn run_dispatch_tick(&self) -> tacedge::dispatch::TickStats {
        self.ctx.dispatcher.run_tick().await.expect("dispatch tick failed")
    }

    /// Spawn the background worker loop, as production does.
    pub fn spawn_worker(&self) {
        tokio::spawn(
            self.ctx
                .dispatcher
                .clone()
                .run(self.ctx.flash_signal.clone()),
        );
    }

    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub async fn spawn_app(config: Config) -> TestApp {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let transport = Arc::new(ScriptedTransport::new());
    let transport_for_ctx = transport.clone();

    let ctx = build_context(
        config,
        Arc::new(MemoryListStore::new()),
        shutdown_rx,
        move |_registry| transport_for_ctx as Arc<dyn NodeTransport>,
    )
    .expect("failed to build test context");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let address = listener.local_addr().unwrap().to_string();

    let app = create_router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });

    TestApp {
        address,
        ctx,
        transport,
        client: reqwest::Client::new(),
        shutdown: shutdown_tx,
    }
}
