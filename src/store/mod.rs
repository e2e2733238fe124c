// ============================================================================
// Ordered List Store
// ============================================================================
//
// Backing storage for the precedence queue: one ordered list of opaque blobs
// per partition, plus a side map keyed by message id that retains the latest
// record (including terminal records removed from their partition).
//
// Two implementations: `RedisListStore` for durable multi-process state and
// `MemoryListStore` for tests and single-process deployments without Redis.
//
// ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

mod memory;
mod redis;

pub use memory::MemoryListStore;
pub use self::redis::RedisListStore;

#[async_trait]
pub trait ListStore: Send + Sync {
    /// Append a blob at the tail of a partition. Durable before returning.
    async fn push_back(&self, partition: &str, blob: &[u8]) -> Result<()>;

    /// The head blob of a partition, without removing it.
    async fn head(&self, partition: &str) -> Result<Option<Vec<u8>>>;

    /// Remove the first list element equal to `blob`. Returns whether an
    /// element was removed.
    async fn remove(&self, partition: &str, blob: &[u8]) -> Result<bool>;

    /// All blobs of a partition, head first.
    async fn entries(&self, partition: &str) -> Result<Vec<Vec<u8>>>;

    async fn len(&self, partition: &str) -> Result<u64>;

    /// Upsert the side-map record for an id.
    async fn put_record(&self, id: Uuid, blob: &[u8]) -> Result<()>;

    async fn get_record(&self, id: Uuid) -> Result<Option<Vec<u8>>>;

    /// Backend liveness check for readiness probes.
    async fn ping(&self) -> Result<()>;
}
