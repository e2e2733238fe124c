use anyhow::Result;
use std::path::PathBuf;

use crate::message::Precedence;

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

// Dispatch timing (in milliseconds unless noted)
const DEFAULT_DISPATCHER_TICK_MS: u64 = 2000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;
const DEFAULT_ATTEMPT_TIMEOUT_FLASH_MS: u64 = 5_000;
const DEFAULT_ATTEMPT_TIMEOUT_OTHER_MS: u64 = 30_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

// Node liveness
const DEFAULT_HEARTBEAT_THRESHOLD_SECS: i64 = 60;

// Request handling
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

// Token issuance
const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;

// Queue watermarks per precedence partition
const DEFAULT_WATERMARK_FLASH: u64 = 100;
const DEFAULT_WATERMARK_IMMEDIATE: u64 = 1_000;
const DEFAULT_WATERMARK_PRIORITY: u64 = 10_000;
const DEFAULT_WATERMARK_ROUTINE: u64 = 100_000;

// Per-token rate limits (fixed 60 s windows)
const DEFAULT_FLASH_PER_MINUTE: u32 = 100;
const DEFAULT_SUBMIT_PER_MINUTE: u32 = 1_000;
const DEFAULT_READS_PER_MINUTE: u32 = 5_000;

/// Submission content ceiling in bytes.
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Accepted TTL range for a submission, in seconds.
pub const TTL_MIN_SECS: i64 = 1;
pub const TTL_MAX_SECS: i64 = 86_400;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Per-partition depth ceilings beyond which submissions are rejected.
#[derive(Clone, Debug)]
pub struct WatermarkConfig {
    pub flash: u64,
    pub immediate: u64,
    pub priority: u64,
    pub routine: u64,
}

impl WatermarkConfig {
    pub fn for_precedence(&self, precedence: Precedence) -> u64 {
        match precedence {
            Precedence::Flash => self.flash,
            Precedence::Immediate => self.immediate,
            Precedence::Priority => self.priority,
            Precedence::Routine => self.routine,
        }
    }
}

/// Per-token request quotas, counted over fixed one-minute windows.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub flash_per_minute: u32,
    pub submit_per_minute: u32,
    pub reads_per_minute: u32,
}

/// Dispatch worker tuning knobs.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub tick_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub attempt_timeout_flash_ms: u64,
    pub attempt_timeout_other_ms: u64,
}

impl DispatchConfig {
    /// Per-attempt delivery timeout for a given precedence.
    pub fn attempt_timeout(&self, precedence: Precedence) -> std::time::Duration {
        let ms = match precedence {
            Precedence::Flash => self.attempt_timeout_flash_ms,
            _ => self.attempt_timeout_other_ms,
        };
        std::time::Duration::from_millis(ms)
    }

    /// Exponential backoff with a ceiling: `base * 2^attempts`, capped.
    pub fn backoff_delay(&self, attempt_count: u32) -> chrono::Duration {
        let exp = attempt_count.min(20);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.backoff_max_ms);
        chrono::Duration::milliseconds(ms as i64)
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// HS256 signing key for bearer tokens. Minimum 32 characters.
    pub token_signing_key: String,
    /// Payload sealing key, 64 hex characters (32 bytes).
    pub content_encryption_key: String,
    /// Key version stamped into every sealed payload.
    pub key_version: u8,
    pub token_ttl_hours: i64,
    pub heartbeat_threshold_secs: i64,
    pub request_timeout_ms: u64,
    pub dispatch: DispatchConfig,
    pub watermarks: WatermarkConfig,
    pub rate_limits: RateLimitConfig,
    /// Backing store for queue partitions. `None` selects the in-process store.
    pub redis_url: Option<String>,
    /// Directory for append-only audit files. `None` keeps the log in memory only.
    pub audit_dir: Option<PathBuf>,
    /// Nodes pre-registered at startup, as `node-id=address` pairs.
    pub seed_nodes: Vec<(String, String)>,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let token_signing_key = std::env::var("TOKEN_SIGNING_KEY")?;
        if token_signing_key.len() < 32 {
            anyhow::bail!("TOKEN_SIGNING_KEY must be at least 32 characters long");
        }

        let content_encryption_key = std::env::var("CONTENT_ENCRYPTION_KEY")?;
        if content_encryption_key.len() != 64 || hex::decode(&content_encryption_key).is_err() {
            anyhow::bail!("CONTENT_ENCRYPTION_KEY must be 64 hex characters (32 bytes)");
        }

        let seed_nodes = std::env::var("SEED_NODES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        let (id, addr) = pair.split_once('=')?;
                        Some((id.trim().to_string(), addr.trim().to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port: env_parse("PORT", DEFAULT_PORT),
            token_signing_key,
            content_encryption_key,
            key_version: env_parse("KEY_VERSION", 1),
            token_ttl_hours: env_parse("TOKEN_TTL_HOURS", DEFAULT_TOKEN_TTL_HOURS),
            heartbeat_threshold_secs: env_parse(
                "HEARTBEAT_THRESHOLD_S",
                DEFAULT_HEARTBEAT_THRESHOLD_SECS,
            ),
            request_timeout_ms: env_parse("REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS),
            dispatch: DispatchConfig {
                tick_ms: env_parse("DISPATCHER_TICK_MS", DEFAULT_DISPATCHER_TICK_MS),
                max_attempts: env_parse("MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
                backoff_base_ms: env_parse("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
                backoff_max_ms: env_parse("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
                attempt_timeout_flash_ms: env_parse(
                    "ATTEMPT_TIMEOUT_FLASH_MS",
                    DEFAULT_ATTEMPT_TIMEOUT_FLASH_MS,
                ),
                attempt_timeout_other_ms: env_parse(
                    "ATTEMPT_TIMEOUT_OTHER_MS",
                    DEFAULT_ATTEMPT_TIMEOUT_OTHER_MS,
                ),
            },
            watermarks: WatermarkConfig {
                flash: env_parse("WATERMARK_FLASH", DEFAULT_WATERMARK_FLASH),
                immediate: env_parse("WATERMARK_IMMEDIATE", DEFAULT_WATERMARK_IMMEDIATE),
                priority: env_parse("WATERMARK_PRIORITY", DEFAULT_WATERMARK_PRIORITY),
                routine: env_parse("WATERMARK_ROUTINE", DEFAULT_WATERMARK_ROUTINE),
            },
            rate_limits: RateLimitConfig {
                flash_per_minute: env_parse("RATE_FLASH_PER_MINUTE", DEFAULT_FLASH_PER_MINUTE),
                submit_per_minute: env_parse("RATE_SUBMIT_PER_MINUTE", DEFAULT_SUBMIT_PER_MINUTE),
                reads_per_minute: env_parse("RATE_READS_PER_MINUTE", DEFAULT_READS_PER_MINUTE),
            },
            redis_url: std::env::var("REDIS_URL").ok(),
            audit_dir: std::env::var("AUDIT_DIR").ok().map(PathBuf::from),
            seed_nodes,
        })
    }
}
