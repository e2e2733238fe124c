// ============================================================================
// Dispatch Worker - Strict-Priority Store-and-Forward Drain
// ============================================================================
//
// One logical worker per process. Each tick drains the partitions in strict
// precedence order: every ready FLASH head is attempted before any IMMEDIATE,
// and so on. Starvation of lower precedences under sustained high-precedence
// load is intended behavior.
//
// The tick interval is a soft latency bound; a FLASH enqueue signals the
// worker through a Notify so the head is attempted without waiting out the
// tick. A partition whose head is not yet due (backoff) is left alone until
// the next tick.
//
// ============================================================================

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{sleep, timeout, Duration};

use crate::audit::{
    message_context, message_resource, AuditAction, AuditActor, AuditEvent, AuditEventType,
    AuditLog, AuditOutcome,
};
use crate::config::DispatchConfig;
use crate::message::{MessageRecord, MessageStatus, Precedence};
use crate::metrics;
use crate::queue::{PrecedenceQueue, QueueError};
use crate::transport::{DeliveryOutcome, NodeTransport};

/// Result of one drain pass, reported by the admin flush endpoint.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TickStats {
    pub delivered: u64,
    pub requeued: u64,
    pub failed: u64,
    pub expired: u64,
}

pub struct Dispatcher {
    queue: Arc<PrecedenceQueue>,
    transport: Arc<dyn NodeTransport>,
    audit: Arc<AuditLog>,
    config: DispatchConfig,
    shutdown: watch::Receiver<bool>,
    // Serializes drain passes so a flush request and the worker loop never
    // serve the same partition concurrently (per-partition FIFO depends on it).
    tick_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<PrecedenceQueue>,
        transport: Arc<dyn NodeTransport>,
        audit: Arc<AuditLog>,
        config: DispatchConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            transport,
            audit,
            config,
            shutdown,
            tick_lock: Mutex::new(()),
        }
    }

    /// Worker loop. Wakes on the tick interval or a FLASH signal, drains the
    /// queue, and exits after finishing the message in hand once shutdown is
    /// requested.
    pub async fn run(self: Arc<Self>, flash_signal: Arc<Notify>) {
        tracing::info!(tick_ms = self.config.tick_ms, "dispatch worker started");
        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = sleep(Duration::from_millis(self.config.tick_ms)) => {}
                _ = flash_signal.notified() => {
                    tracing::debug!("dispatch tick triggered by flash signal");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            if let Err(e) = self.run_tick().await {
                tracing::error!(error = %e, "dispatch tick failed");
                sleep(Duration::from_millis(self.config.tick_ms)).await;
            }

            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("dispatch worker stopped, queued messages remain durable");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// One full drain pass: partitions in precedence order, then TTL expiry.
    pub async fn run_tick(&self) -> Result<TickStats, QueueError> {
        let _guard = self.tick_lock.lock().await;
        let mut stats = TickStats::default();

        for precedence in Precedence::ALL {
            self.drain_partition(precedence, &mut stats).await?;
            if self.stopping() {
                break;
            }
        }

        self.expire_pass(&mut stats).await?;

        if stats.delivered + stats.requeued + stats.failed + stats.expired > 0 {
            tracing::debug!(
                delivered = stats.delivered,
                requeued = stats.requeued,
                failed = stats.failed,
                expired = stats.expired,
                "dispatch tick complete"
            );
        }
        Ok(stats)
    }

    /// Attempt every ready head of one partition. Stops when the partition is
    /// empty or its head is not yet due for another attempt.
    async fn drain_partition(
        &self,
        precedence: Precedence,
        stats: &mut TickStats,
    ) -> Result<(), QueueError> {
        loop {
            if self.stopping() {
                return Ok(());
            }
            let Some(head) = self.queue.peek(precedence).await? else {
                return Ok(());
            };
            if head.next_attempt_at > Utc::now() {
                return Ok(());
            }
            self.attempt_delivery(head, stats).await?;
        }
    }

    async fn attempt_delivery(
        &self,
        head: MessageRecord,
        stats: &mut TickStats,
    ) -> Result<(), QueueError> {
        let record = self.queue.mark_in_flight(head.id).await?;
        let precedence = record.precedence;

        let outcome = match timeout(
            self.config.attempt_timeout(precedence),
            self.transport
                .deliver(&record.recipient, &record.sealed_payload, precedence),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::Transient("delivery attempt timed out".to_string()),
        };

        match outcome {
            DeliveryOutcome::Delivered => {
                let delivered = self.queue.ack(record.id).await?;
                self.audit
                    .emit(AuditEvent::new(
                        AuditEventType::MessageDelivered,
                        AuditActor::system(),
                        AuditAction::new(
                            "DELIVER",
                            message_resource(delivered.id),
                            AuditOutcome::Success,
                        ),
                        message_context(&delivered),
                    ))
                    .await;
                metrics::MESSAGES_TOTAL
                    .with_label_values(&[precedence.as_str(), "DELIVERED"])
                    .inc();
                stats.delivered += 1;
                tracing::info!(
                    message_id = %delivered.id,
                    precedence = %precedence,
                    recipient = %delivered.recipient,
                    attempts = delivered.attempt_count + 1,
                    "message delivered"
                );
            }
            DeliveryOutcome::Transient(reason) => {
                if record.attempt_count + 1 >= self.config.max_attempts {
                    self.fail_message(&record, format!("attempts exhausted: {reason}"))
                        .await?;
                    stats.failed += 1;
                } else {
                    let delay = self.config.backoff_delay(record.attempt_count);
                    let requeued = self.queue.requeue(record.id, delay).await?;
                    self.audit
                        .emit(AuditEvent::new(
                            AuditEventType::MessageDelivered,
                            AuditActor::system(),
                            AuditAction::new(
                                "DELIVER",
                                message_resource(requeued.id),
                                AuditOutcome::Failure,
                            )
                            .with_reason(reason.clone()),
                            message_context(&requeued),
                        ))
                        .await;
                    stats.requeued += 1;
                    tracing::warn!(
                        message_id = %record.id,
                        precedence = %precedence,
                        attempts = requeued.attempt_count,
                        reason = %reason,
                        "transient delivery failure, requeued"
                    );
                }
            }
            DeliveryOutcome::Permanent(reason) => {
                self.fail_message(&record, reason).await?;
                stats.failed += 1;
            }
        }
        Ok(())
    }

    async fn fail_message(&self, record: &MessageRecord, reason: String) -> Result<(), QueueError> {
        let failed = self.queue.reject(record.id, MessageStatus::Failed).await?;
        self.audit
            .emit(AuditEvent::new(
                AuditEventType::MessageFailed,
                AuditActor::system(),
                AuditAction::new(
                    "DELIVER",
                    message_resource(failed.id),
                    AuditOutcome::Failure,
                )
                .with_reason(reason.clone()),
                message_context(&failed),
            ))
            .await;
        metrics::MESSAGES_TOTAL
            .with_label_values(&[record.precedence.as_str(), "FAILED"])
            .inc();
        tracing::error!(
            message_id = %record.id,
            precedence = %record.precedence,
            attempts = failed.attempt_count,
            reason = %reason,
            "message failed permanently"
        );
        Ok(())
    }

    /// Evict every queued or in-flight message whose TTL has elapsed.
    async fn expire_pass(&self, stats: &mut TickStats) -> Result<(), QueueError> {
        let now = Utc::now();
        for id in self.queue.scan_expired(now).await? {
            match self.queue.reject(id, MessageStatus::Expired).await {
                Ok(expired) => {
                    self.audit
                        .emit(AuditEvent::new(
                            AuditEventType::MessageExpired,
                            AuditActor::system(),
                            AuditAction::new(
                                "EXPIRE",
                                message_resource(expired.id),
                                AuditOutcome::Failure,
                            )
                            .with_reason("ttl elapsed"),
                            message_context(&expired),
                        ))
                        .await;
                    metrics::MESSAGES_EXPIRED
                        .with_label_values(&[expired.precedence.as_str()])
                        .inc();
                    stats.expired += 1;
                    tracing::warn!(
                        message_id = %expired.id,
                        precedence = %expired.precedence,
                        expired_at = %expired.expires_at,
                        "message expired before delivery"
                    );
                }
                Err(e) => {
                    tracing::warn!(message_id = %id, error = %e, "failed to expire message");
                }
            }
        }
        Ok(())
    }
}
