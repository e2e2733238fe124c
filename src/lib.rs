use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod audit;
pub mod auth;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod metrics;
pub mod nodes;
pub mod queue;
pub mod rate_limit;
pub mod routes;
pub mod sealer;
pub mod store;
pub mod transport;

use audit::{AuditAction, AuditActor, AuditEvent, AuditEventType, AuditLog, AuditOutcome};
use auth::AuthManager;
use config::Config;
use context::AppContext;
use dispatch::Dispatcher;
use nodes::NodeRegistry;
use queue::PrecedenceQueue;
use rate_limit::RateLimiter;
use sealer::CryptoSealer;
use store::{ListStore, MemoryListStore, RedisListStore};
use transport::{HttpNodeTransport, NodeTransport};

/// Wire the relay's components together. The transport is built last because
/// it needs the node registry for address resolution.
pub fn build_context<F>(
    config: Config,
    store: Arc<dyn ListStore>,
    shutdown: watch::Receiver<bool>,
    transport_factory: F,
) -> Result<Arc<AppContext>>
where
    F: FnOnce(Arc<NodeRegistry>) -> Arc<dyn NodeTransport>,
{
    let config = Arc::new(config);
    let audit = Arc::new(AuditLog::new(config.audit_dir.clone()));
    let sealer = Arc::new(
        CryptoSealer::from_hex_key(
            &config.content_encryption_key,
            config.key_version,
            audit.clone(),
        )
        .map_err(|e| anyhow::anyhow!("invalid content encryption key: {e}"))?,
    );
    let queue = Arc::new(PrecedenceQueue::new(store, config.watermarks.clone()));
    let nodes = Arc::new(NodeRegistry::new(config.heartbeat_threshold_secs));
    let auth = Arc::new(AuthManager::new(
        &config.token_signing_key,
        config.token_ttl_hours,
    ));
    let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
    let transport = transport_factory(nodes.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        queue.clone(),
        transport,
        audit.clone(),
        config.dispatch.clone(),
        shutdown,
    ));

    Ok(Arc::new(AppContext {
        config,
        audit,
        sealer,
        queue,
        nodes,
        auth,
        limiter,
        dispatcher,
        flash_signal: Arc::new(Notify::new()),
    }))
}

pub async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ListStore> = match config.redis_url {
        Some(ref url) => {
            let store = tokio::time::timeout(
                std::time::Duration::from_secs(10),
                RedisListStore::connect(url),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Redis connection timed out after 10 seconds"))??;
            Arc::new(store)
        }
        None => {
            tracing::warn!("no REDIS_URL configured, queued messages will not survive a restart");
            Arc::new(MemoryListStore::new())
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = build_context(config, store, shutdown_rx, |registry| {
        Arc::new(HttpNodeTransport::new(registry)) as Arc<dyn NodeTransport>
    })?;

    ctx.queue
        .recover()
        .await
        .map_err(|e| anyhow::anyhow!("queue recovery failed: {e}"))?;

    for (node_id, address) in &ctx.config.seed_nodes {
        ctx.nodes
            .register(node_id, Some(address.clone()), None)
            .await;
    }
    if !ctx.config.seed_nodes.is_empty() {
        tracing::info!(count = ctx.config.seed_nodes.len(), "seeded node registry");
    }

    ctx.audit
        .append(AuditEvent::new(
            AuditEventType::AuditStart,
            AuditActor::system(),
            AuditAction::new("STARTUP", "relay".to_string(), AuditOutcome::Success),
            serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }),
        ))
        .await?;

    let worker = tokio::spawn(ctx.dispatcher.clone().run(ctx.flash_signal.clone()));

    let app = routes::create_router(ctx.clone());
    let bind_address = format!("0.0.0.0:{}", ctx.config.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!("TacEdge gateway listening on http://{bind_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    // Let the dispatcher finish the message in hand, then exit. Queued
    // messages remain durable in the backing store.
    let _ = shutdown_tx.send(true);
    let _ = worker.await;

    Ok(())
}
