use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ListStore;

/// In-process list store. State does not survive a restart; it exists for
/// tests and for deployments that accept process-lifetime durability.
#[derive(Default)]
pub struct MemoryListStore {
    partitions: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    records: Mutex<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push_back(&self, partition: &str, blob: &[u8]) -> Result<()> {
        let mut partitions = self.partitions.lock().await;
        partitions
            .entry(partition.to_string())
            .or_default()
            .push_back(blob.to_vec());
        Ok(())
    }

    async fn head(&self, partition: &str) -> Result<Option<Vec<u8>>> {
        let partitions = self.partitions.lock().await;
        Ok(partitions
            .get(partition)
            .and_then(|list| list.front().cloned()))
    }

    async fn remove(&self, partition: &str, blob: &[u8]) -> Result<bool> {
        let mut partitions = self.partitions.lock().await;
        if let Some(list) = partitions.get_mut(partition) {
            if let Some(index) = list.iter().position(|entry| entry == blob) {
                list.remove(index);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn entries(&self, partition: &str) -> Result<Vec<Vec<u8>>> {
        let partitions = self.partitions.lock().await;
        Ok(partitions
            .get(partition)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, partition: &str) -> Result<u64> {
        let partitions = self.partitions.lock().await;
        Ok(partitions.get(partition).map(|l| l.len() as u64).unwrap_or(0))
    }

    async fn put_record(&self, id: Uuid, blob: &[u8]) -> Result<()> {
        self.records.lock().await.insert(id, blob.to_vec());
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preserves_fifo_order_per_partition() {
        let store = MemoryListStore::new();
        store.push_back("flash", b"a").await.unwrap();
        store.push_back("flash", b"b").await.unwrap();
        store.push_back("routine", b"z").await.unwrap();

        assert_eq!(store.head("flash").await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(store.len("flash").await.unwrap(), 2);
        assert_eq!(store.len("routine").await.unwrap(), 1);

        assert!(store.remove("flash", b"a").await.unwrap());
        assert_eq!(store.head("flash").await.unwrap(), Some(b"b".to_vec()));
        assert!(!store.remove("flash", b"a").await.unwrap());
    }

    #[tokio::test]
    async fn side_map_retains_latest_record() {
        let store = MemoryListStore::new();
        let id = Uuid::new_v4();
        store.put_record(id, b"v1").await.unwrap();
        store.put_record(id, b"v2").await.unwrap();
        assert_eq!(store.get_record(id).await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.get_record(Uuid::new_v4()).await.unwrap(), None);
    }
}
