use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;

// ============================================================================
// Per-Token Rate Limiting
// ============================================================================
//
// Fixed one-minute windows keyed by (token jti, request class), kept
// in-process. Counting is increment-then-compare: the request that crosses
// the limit is the first one rejected. Coarse by design; exact counting is
// not required here.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    /// FLASH submissions.
    FlashSubmit,
    /// Submissions at any other precedence.
    Submit,
    /// Read-side requests (status, content, nodes, queue, audit).
    Read,
}

impl RateClass {
    fn as_str(&self) -> &'static str {
        match self {
            RateClass::FlashSubmit => "flash",
            RateClass::Submit => "submit",
            RateClass::Read => "read",
        }
    }
}

const WINDOW_SECS: i64 = 60;
// Stale windows are pruned once the table grows past this many entries.
const PRUNE_THRESHOLD: usize = 4_096;

fn window_length() -> Duration {
    Duration::seconds(WINDOW_SECS)
}

struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

#[derive(Debug)]
pub struct RateExceeded {
    pub limit: u32,
    pub retry_after_secs: i64,
    pub class: &'static str,
}

pub struct RateLimiter {
    limits: RateLimitConfig,
    windows: Mutex<HashMap<(String, RateClass), Window>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, class: RateClass) -> u32 {
        match class {
            RateClass::FlashSubmit => self.limits.flash_per_minute,
            RateClass::Submit => self.limits.submit_per_minute,
            RateClass::Read => self.limits.reads_per_minute,
        }
    }

    /// Count one request against a token's quota for the class.
    pub async fn check(&self, token_id: &str, class: RateClass) -> Result<(), RateExceeded> {
        let limit = self.limit_for(class);
        let now = Utc::now();
        let mut windows = self.windows.lock().await;

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| now - w.started_at <= window_length());
        }

        let window = windows
            .entry((token_id.to_string(), class))
            .or_insert(Window {
                started_at: now,
                count: 0,
            });

        if now - window.started_at > window_length() {
            window.started_at = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > limit {
            let retry_after = (window.started_at + window_length() - now).num_seconds().max(1);
            tracing::warn!(
                token_id = %token_id,
                class = class.as_str(),
                count = window.count,
                limit = limit,
                "rate limit exceeded"
            );
            return Err(RateExceeded {
                limit,
                retry_after_secs: retry_after,
                class: class.as_str(),
            });
        }

        Ok(())
    }
}
