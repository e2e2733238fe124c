use anyhow::Result;
use async_trait::async_trait;
use redis::{cmd, AsyncCommands};
use uuid::Uuid;

use super::ListStore;

const QUEUE_KEY_PREFIX: &str = "tacedge:queue:";
const RECORD_KEY_PREFIX: &str = "tacedge:msg:";

/// Redis-backed list store. Partitions are Redis lists; the record side map
/// is one key per message id. All writes are durable (from the process's
/// perspective) once the Redis call returns.
pub struct RedisListStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisListStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        tracing::debug!("opening Redis client for queue store");
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow::anyhow!("failed to parse Redis URL: {e}"))?;

        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow::anyhow!("failed to connect to Redis: {e}"))?;

        tracing::info!("queue store connected to Redis");
        Ok(Self { conn })
    }

    fn queue_key(partition: &str) -> String {
        format!("{QUEUE_KEY_PREFIX}{partition}")
    }

    fn record_key(id: Uuid) -> String {
        format!("{RECORD_KEY_PREFIX}{id}")
    }
}

#[async_trait]
impl ListStore for RedisListStore {
    async fn push_back(&self, partition: &str, blob: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(Self::queue_key(partition), blob).await?;
        Ok(())
    }

    async fn head(&self, partition: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let head: Option<Vec<u8>> = conn.lindex(Self::queue_key(partition), 0).await?;
        Ok(head)
    }

    async fn remove(&self, partition: &str, blob: &[u8]) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(Self::queue_key(partition), 1, blob).await?;
        Ok(removed > 0)
    }

    async fn entries(&self, partition: &str) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let entries: Vec<Vec<u8>> = conn.lrange(Self::queue_key(partition), 0, -1).await?;
        Ok(entries)
    }

    async fn len(&self, partition: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(Self::queue_key(partition)).await?;
        Ok(len)
    }

    async fn put_record(&self, id: Uuid, blob: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(Self::record_key(id), blob).await?;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let blob: Option<Vec<u8>> = conn.get(Self::record_key(id)).await?;
        Ok(blob)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
