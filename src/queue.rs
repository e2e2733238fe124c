// ============================================================================
// Precedence Queue - Four-Partition Store-and-Forward
// ============================================================================
//
// One durable FIFO partition per precedence. Partition entries carry the
// MessagePack-encoded record as of its last (re)enqueue; the side map always
// holds the current record, including terminal records that have left their
// partition. Invariants maintained here:
//
// - A record is in a partition iff its status is QUEUED or IN_FLIGHT
// - depth(p) equals the partition's entry count (tracked in lock-free
//   counters so `depths()` never touches the store)
// - Status transitions follow the submission state machine and never regress
// - Requeue re-enters at the tail with an incremented attempt count
//
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::WatermarkConfig;
use crate::message::{MessageRecord, MessageStatus, Precedence};
use crate::metrics;
use crate::store::ListStore;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("message {0} not found")]
    NotFound(Uuid),

    #[error("invalid status transition {from} -> {to} for message {id}")]
    InvalidTransition {
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("message {0} is not present in its partition")]
    NotQueued(Uuid),

    #[error("failed to decode queue record: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub struct PrecedenceQueue {
    store: Arc<dyn ListStore>,
    depths: [AtomicU64; 4],
    tripped: [AtomicBool; 4],
    watermarks: WatermarkConfig,
}

impl PrecedenceQueue {
    pub fn new(store: Arc<dyn ListStore>, watermarks: WatermarkConfig) -> Self {
        Self {
            store,
            depths: Default::default(),
            tripped: Default::default(),
            watermarks,
        }
    }

    /// Rebuild depth counters from the backing store. Called once at startup
    /// so queued messages survive a process restart.
    pub async fn recover(&self) -> Result<(), QueueError> {
        for precedence in Precedence::ALL {
            let len = self.store.len(precedence.partition()).await?;
            self.depths[precedence.index()].store(len, Ordering::Relaxed);
            metrics::QUEUE_DEPTH
                .with_label_values(&[precedence.as_str()])
                .set(len as i64);
            if len > 0 {
                tracing::info!(
                    partition = precedence.as_str(),
                    depth = len,
                    "recovered queued messages from store"
                );
            }
        }
        Ok(())
    }

    /// Admission check with hysteresis: a partition at or above its watermark
    /// rejects submissions until depth drops below 90 % of the watermark.
    pub fn admit(&self, precedence: Precedence) -> bool {
        let index = precedence.index();
        let depth = self.depths[index].load(Ordering::Relaxed);
        let watermark = self.watermarks.for_precedence(precedence);
        let resume_below = (watermark * 9) / 10;

        if self.tripped[index].load(Ordering::Relaxed) {
            if depth < resume_below {
                self.tripped[index].store(false, Ordering::Relaxed);
                true
            } else {
                false
            }
        } else if depth >= watermark {
            self.tripped[index].store(true, Ordering::Relaxed);
            false
        } else {
            true
        }
    }

    /// Place a freshly submitted record at the tail of its partition.
    /// Returns only after the record is durable in the backing store.
    pub async fn enqueue(&self, record: &MessageRecord) -> Result<(), QueueError> {
        if record.status != MessageStatus::Queued {
            return Err(QueueError::InvalidTransition {
                id: record.id,
                from: record.status,
                to: MessageStatus::Queued,
            });
        }

        let blob = encode(record)?;
        self.store.put_record(record.id, &blob).await?;
        self.store
            .push_back(record.precedence.partition(), &blob)
            .await?;
        self.bump_depth(record.precedence, 1);

        tracing::info!(
            message_id = %record.id,
            precedence = %record.precedence,
            recipient = %record.recipient,
            expires_at = %record.expires_at,
            "message enqueued"
        );
        Ok(())
    }

    /// Head of a partition without removing it. The returned record reflects
    /// the state as of its last (re)enqueue.
    pub async fn peek(&self, precedence: Precedence) -> Result<Option<MessageRecord>, QueueError> {
        match self.store.head(precedence.partition()).await? {
            Some(blob) => Ok(Some(decode(&blob)?)),
            None => Ok(None),
        }
    }

    /// Current record for an id, regardless of partition membership.
    pub async fn get(&self, id: Uuid) -> Result<Option<MessageRecord>, QueueError> {
        match self.store.get_record(id).await? {
            Some(blob) => Ok(Some(decode(&blob)?)),
            None => Ok(None),
        }
    }

    /// Transition a queued record to IN_FLIGHT ahead of a delivery attempt.
    /// The partition entry is left in place; only an acknowledged or rejected
    /// record leaves its partition.
    pub async fn mark_in_flight(&self, id: Uuid) -> Result<MessageRecord, QueueError> {
        let mut record = self.get(id).await?.ok_or(QueueError::NotFound(id))?;
        transition(&mut record, MessageStatus::InFlight)?;
        self.store.put_record(id, &encode(&record)?).await?;
        Ok(record)
    }

    /// Remove a record from its partition after successful delivery and mark
    /// it DELIVERED. A QUEUED record is accepted too (out-of-band recipient
    /// acknowledgment) and passes through IN_FLIGHT.
    pub async fn ack(&self, id: Uuid) -> Result<MessageRecord, QueueError> {
        let mut record = self.get(id).await?.ok_or(QueueError::NotFound(id))?;
        if record.status == MessageStatus::Queued {
            transition(&mut record, MessageStatus::InFlight)?;
        }
        transition(&mut record, MessageStatus::Delivered)?;

        self.remove_partition_entry(&record).await?;
        self.store.put_record(id, &encode(&record)?).await?;

        tracing::info!(
            message_id = %id,
            precedence = %record.precedence,
            attempts = record.attempt_count,
            "message acknowledged"
        );
        Ok(record)
    }

    /// Return an IN_FLIGHT record to the tail of its partition with an
    /// incremented attempt count and a retry-after delay.
    pub async fn requeue(&self, id: Uuid, delay: Duration) -> Result<MessageRecord, QueueError> {
        let mut record = self.get(id).await?.ok_or(QueueError::NotFound(id))?;
        transition(&mut record, MessageStatus::Queued)?;
        record.attempt_count += 1;
        record.next_attempt_at = Utc::now() + delay;

        let partition = record.precedence.partition();
        let old = self
            .locate(partition, id)
            .await?
            .ok_or(QueueError::NotQueued(id))?;
        self.store.remove(partition, &old).await?;

        let blob = encode(&record)?;
        self.store.put_record(id, &blob).await?;
        self.store.push_back(partition, &blob).await?;

        tracing::info!(
            message_id = %id,
            precedence = %record.precedence,
            attempts = record.attempt_count,
            next_attempt_at = %record.next_attempt_at,
            "message requeued with backoff"
        );
        Ok(record)
    }

    /// Remove a record from its partition and mark it FAILED or EXPIRED.
    pub async fn reject(
        &self,
        id: Uuid,
        terminal: MessageStatus,
    ) -> Result<MessageRecord, QueueError> {
        debug_assert!(matches!(
            terminal,
            MessageStatus::Failed | MessageStatus::Expired
        ));

        let mut record = self.get(id).await?.ok_or(QueueError::NotFound(id))?;
        transition(&mut record, terminal)?;

        self.remove_partition_entry(&record).await?;
        self.store.put_record(id, &encode(&record)?).await?;

        tracing::warn!(
            message_id = %id,
            precedence = %record.precedence,
            status = %terminal,
            attempts = record.attempt_count,
            "message rejected from queue"
        );
        Ok(record)
    }

    /// Lock-free depth of one partition. May be slightly stale.
    pub fn depth(&self, precedence: Precedence) -> u64 {
        self.depths[precedence.index()].load(Ordering::Relaxed)
    }

    pub fn depths(&self) -> HashMap<Precedence, u64> {
        Precedence::ALL
            .into_iter()
            .map(|p| (p, self.depth(p)))
            .collect()
    }

    pub fn total_depth(&self) -> u64 {
        Precedence::ALL.into_iter().map(|p| self.depth(p)).sum()
    }

    /// Ids of queued or in-flight messages whose TTL has elapsed.
    pub async fn scan_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, QueueError> {
        let mut expired = Vec::new();
        for precedence in Precedence::ALL {
            for blob in self.store.entries(precedence.partition()).await? {
                let record = decode(&blob)?;
                if record.is_expired(now) {
                    expired.push(record.id);
                }
            }
        }
        Ok(expired)
    }

    pub async fn ping(&self) -> Result<(), QueueError> {
        self.store.ping().await?;
        Ok(())
    }

    async fn locate(&self, partition: &str, id: Uuid) -> Result<Option<Vec<u8>>, QueueError> {
        for blob in self.store.entries(partition).await? {
            if decode(&blob)?.id == id {
                return Ok(Some(blob));
            }
        }
        Ok(None)
    }

    async fn remove_partition_entry(&self, record: &MessageRecord) -> Result<(), QueueError> {
        let partition = record.precedence.partition();
        let blob = self
            .locate(partition, record.id)
            .await?
            .ok_or(QueueError::NotQueued(record.id))?;
        if self.store.remove(partition, &blob).await? {
            self.bump_depth(record.precedence, -1);
        }
        Ok(())
    }

    fn bump_depth(&self, precedence: Precedence, delta: i64) {
        let counter = &self.depths[precedence.index()];
        let depth = if delta >= 0 {
            counter.fetch_add(delta as u64, Ordering::Relaxed) + delta as u64
        } else {
            counter.fetch_sub((-delta) as u64, Ordering::Relaxed) - (-delta) as u64
        };
        metrics::QUEUE_DEPTH
            .with_label_values(&[precedence.as_str()])
            .set(depth as i64);
    }
}

fn transition(record: &mut MessageRecord, to: MessageStatus) -> Result<(), QueueError> {
    if !record.status.can_transition_to(to) {
        return Err(QueueError::InvalidTransition {
            id: record.id,
            from: record.status,
            to,
        });
    }
    record.status = to;
    Ok(())
}

fn encode(record: &MessageRecord) -> Result<Vec<u8>, QueueError> {
    rmp_serde::to_vec_named(record).map_err(|e| QueueError::Decode(e.to_string()))
}

fn decode(blob: &[u8]) -> Result<MessageRecord, QueueError> {
    rmp_serde::from_slice(blob).map_err(|e| QueueError::Decode(e.to_string()))
}
