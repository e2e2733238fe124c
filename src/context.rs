use std::sync::Arc;
use tokio::sync::Notify;

use crate::audit::AuditLog;
use crate::auth::AuthManager;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::nodes::NodeRegistry;
use crate::queue::PrecedenceQueue;
use crate::rate_limit::RateLimiter;
use crate::sealer::CryptoSealer;

/// Capability bundle shared by every request handler. The components of the
/// relay (audit log, sealer, queue, dispatcher) are in-process objects; the
/// HTTP surface is the only trust boundary.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub audit: Arc<AuditLog>,
    pub sealer: Arc<CryptoSealer>,
    pub queue: Arc<PrecedenceQueue>,
    pub nodes: Arc<NodeRegistry>,
    pub auth: Arc<AuthManager>,
    pub limiter: Arc<RateLimiter>,
    pub dispatcher: Arc<Dispatcher>,
    /// Woken after a FLASH enqueue so the dispatcher can short-circuit its tick.
    pub flash_signal: Arc<Notify>,
}
