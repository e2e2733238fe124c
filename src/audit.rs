// ============================================================================
// Audit Log - NIST 800-53 Tagged Event Store
// ============================================================================
//
// Append-only store of structured security events, each tagged with a
// control family (AC, AU, IA, SC, SI). Events are:
// - Immutable once appended (no update, no delete)
// - Ordered by a per-process monotonic timestamp (ties bumped by 1 microsecond
//   under the append lock)
// - Indexed in memory for filtered retrieval, newest-first
// - Optionally persisted as append-only JSONL files with daily rotation
//
// `append` is durable before it returns and is required on the submission
// path; `emit` is the best-effort wrapper for everything else.
//
// ============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::message::MessageRecord;
use crate::metrics;

/// NIST 800-53 control family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlFamily {
    Ac,
    Au,
    Ia,
    Sc,
    Si,
}

impl ControlFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlFamily::Ac => "AC",
            ControlFamily::Au => "AU",
            ControlFamily::Ia => "IA",
            ControlFamily::Sc => "SC",
            ControlFamily::Si => "SI",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AC" => Some(ControlFamily::Ac),
            "AU" => Some(ControlFamily::Au),
            "IA" => Some(ControlFamily::Ia),
            "SC" => Some(ControlFamily::Sc),
            "SI" => Some(ControlFamily::Si),
            _ => None,
        }
    }
}

impl std::fmt::Display for ControlFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event types. Each type belongs to exactly one control family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    // AC - access control
    RbacCheck,
    PermissionDenied,
    RateLimitViolation,
    // AU - audit & accountability
    AuditStart,
    MessageSubmitted,
    MessageDelivered,
    MessageFailed,
    MessageExpired,
    QueueFull,
    // IA - identification & authentication
    AuthSuccess,
    AuthFailure,
    TokenIssued,
    // SC - system & communications protection
    Encrypt,
    Decrypt,
    KeyRotate,
    // SI - system & information integrity
    IntegrityCheck,
    ValidationFailure,
    InternalError,
}

impl AuditEventType {
    pub fn family(&self) -> ControlFamily {
        match self {
            AuditEventType::RbacCheck
            | AuditEventType::PermissionDenied
            | AuditEventType::RateLimitViolation => ControlFamily::Ac,
            AuditEventType::AuditStart
            | AuditEventType::MessageSubmitted
            | AuditEventType::MessageDelivered
            | AuditEventType::MessageFailed
            | AuditEventType::MessageExpired
            | AuditEventType::QueueFull => ControlFamily::Au,
            AuditEventType::AuthSuccess
            | AuditEventType::AuthFailure
            | AuditEventType::TokenIssued => ControlFamily::Ia,
            AuditEventType::Encrypt | AuditEventType::Decrypt | AuditEventType::KeyRotate => {
                ControlFamily::Sc
            }
            AuditEventType::IntegrityCheck
            | AuditEventType::ValidationFailure
            | AuditEventType::InternalError => ControlFamily::Si,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Who performed the audited operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditActor {
    pub node_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
}

impl AuditActor {
    /// Actor for events the relay itself originates (dispatch, expiry, startup).
    pub fn system() -> Self {
        Self {
            node_id: "tacedge-gateway".to_string(),
            role: "service".to_string(),
            source_address: None,
        }
    }
}

/// What was done, to what, and how it came out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditAction {
    pub operation: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditAction {
    pub fn new(operation: &str, resource: String, outcome: AuditOutcome) -> Self {
        Self {
            operation: operation.to_string(),
            resource,
            outcome,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub control_family: ControlFamily,
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    pub action: AuditAction,
    pub context: serde_json::Value,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        actor: AuditActor,
        action: AuditAction,
        context: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            control_family: event_type.family(),
            event_type,
            actor,
            action,
            context,
        }
    }
}

/// Context map for events that concern a message. Carries precedence and
/// classification; never the payload.
pub fn message_context(record: &MessageRecord) -> serde_json::Value {
    serde_json::json!({
        "message_id": record.id,
        "precedence": record.precedence,
        "classification": record.classification,
        "sender": record.sender,
        "recipient": record.recipient,
    })
}

pub fn message_resource(id: Uuid) -> String {
    format!("message:{id}")
}

/// Retrieval filter. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub control_family: Option<ControlFamily>,
    pub event_type: Option<AuditEventType>,
    pub node_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

const DEFAULT_QUERY_LIMIT: usize = 100;
const MAX_QUERY_LIMIT: usize = 1_000;

impl AuditQuery {
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(family) = self.control_family {
            if event.control_family != family {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if event.event_type != event_type {
                return false;
            }
        }
        if let Some(ref node_id) = self.node_id {
            if &event.actor.node_id != node_id {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if event.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if event.timestamp > end {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Serialize)]
pub struct ActorCount {
    pub node_id: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct AuditStats {
    pub total_events: u64,
    pub by_control_family: HashMap<String, u64>,
    pub by_outcome: HashMap<String, u64>,
    pub top_actors: Vec<ActorCount>,
}

struct WriterState {
    last_timestamp: DateTime<Utc>,
    dir: Option<PathBuf>,
    // (date the file was opened for, handle)
    file: Option<(String, tokio::fs::File)>,
}

/// Append-only audit log with in-memory retrieval and optional JSONL
/// persistence. Appends are serialized behind one lock; queries take only a
/// read lock on the event list.
pub struct AuditLog {
    events: RwLock<Vec<Arc<AuditEvent>>>,
    writer: Mutex<WriterState>,
}

impl AuditLog {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            writer: Mutex::new(WriterState {
                last_timestamp: DateTime::<Utc>::MIN_UTC,
                dir,
                file: None,
            }),
        }
    }

    /// Append an event; returns once the event is durable. The stored
    /// timestamp is monotonic within this process.
    pub async fn append(&self, mut event: AuditEvent) -> Result<Arc<AuditEvent>> {
        let mut writer = self.writer.lock().await;

        let now = Utc::now();
        let timestamp = if now <= writer.last_timestamp {
            writer.last_timestamp + chrono::Duration::microseconds(1)
        } else {
            now
        };
        writer.last_timestamp = timestamp;
        event.timestamp = timestamp;

        let event = Arc::new(event);

        Self::persist(&mut writer, &event)
            .await
            .context("failed to persist audit event")?;

        // Push while still holding the writer lock so list order matches
        // timestamp order.
        self.events.write().await.push(event.clone());
        drop(writer);

        metrics::AUDIT_EVENTS
            .with_label_values(&[event.control_family.as_str()])
            .inc();

        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            control_family = %event.control_family,
            event_type = ?event.event_type,
            actor_node = %event.actor.node_id,
            operation = %event.action.operation,
            resource = %event.action.resource,
            outcome = ?event.action.outcome,
            "audit event recorded"
        );

        Ok(event)
    }

    /// Best-effort append for events off the submission path. Failures are
    /// logged, never surfaced to the caller.
    pub async fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.append(event).await {
            tracing::warn!(error = %e, "dropping audit event after persistence failure");
        }
    }

    async fn persist(writer: &mut WriterState, event: &AuditEvent) -> Result<()> {
        let Some(dir) = writer.dir.clone() else {
            return Ok(());
        };

        // Daily rotation: reopen when the event date rolls over.
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let reopen = !matches!(writer.file, Some((ref open_date, _)) if *open_date == date);
        if reopen {
            tokio::fs::create_dir_all(&dir).await?;
            let path = dir.join(format!("audit-{date}.jsonl"));
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("failed to open audit file {}", path.display()))?;
            writer.file = Some((date, file));
        }

        if let Some((_, file)) = writer.file.as_mut() {
            let mut line = serde_json::to_vec(event)?;
            line.push(b'\n');
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }

    /// Filtered retrieval, newest-first, capped at the query limit.
    pub async fn query(&self, query: &AuditQuery) -> Vec<Arc<AuditEvent>> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .min(MAX_QUERY_LIMIT);
        let events = self.events.read().await;
        events
            .iter()
            .rev()
            .filter(|e| query.matches(e))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Causal-order (oldest-first) trail of events for one message.
    pub async fn trail(&self, message_id: Uuid) -> Vec<Arc<AuditEvent>> {
        let resource = message_resource(message_id);
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.action.resource == resource)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn stats(&self) -> AuditStats {
        let events = self.events.read().await;

        let mut by_control_family: HashMap<String, u64> = HashMap::new();
        let mut by_outcome: HashMap<String, u64> = HashMap::new();
        let mut actor_counts: HashMap<String, u64> = HashMap::new();

        for event in events.iter() {
            *by_control_family
                .entry(event.control_family.as_str().to_string())
                .or_default() += 1;
            let outcome = match event.action.outcome {
                AuditOutcome::Success => "SUCCESS",
                AuditOutcome::Failure => "FAILURE",
            };
            *by_outcome.entry(outcome.to_string()).or_default() += 1;
            *actor_counts.entry(event.actor.node_id.clone()).or_default() += 1;
        }

        let mut top_actors: Vec<ActorCount> = actor_counts
            .into_iter()
            .map(|(node_id, count)| ActorCount { node_id, count })
            .collect();
        top_actors.sort_by(|a, b| b.count.cmp(&a.count).then(a.node_id.cmp(&b.node_id)));
        top_actors.truncate(10);

        AuditStats {
            total_events: events.len() as u64,
            by_control_family,
            by_outcome,
            top_actors,
        }
    }

    /// Full log as JSONL, oldest-first, for external analysis.
    pub async fn export_jsonl(&self) -> Result<String> {
        let events = self.events.read().await;
        let mut out = String::new();
        for event in events.iter() {
            out.push_str(&serde_json::to_string(event.as_ref())?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: AuditEventType, node: &str, outcome: AuditOutcome) -> AuditEvent {
        AuditEvent::new(
            event_type,
            AuditActor {
                node_id: node.to_string(),
                role: "operator".to_string(),
                source_address: None,
            },
            AuditAction::new("TEST", "message:test".to_string(), outcome),
            serde_json::Value::Null,
        )
    }

    #[tokio::test]
    async fn timestamps_are_monotonic_and_query_is_newest_first() {
        let log = AuditLog::new(None);
        for _ in 0..50 {
            log.append(event(
                AuditEventType::MessageSubmitted,
                "NODE-ALPHA",
                AuditOutcome::Success,
            ))
            .await
            .unwrap();
        }

        let results = log.query(&AuditQuery::default()).await;
        assert_eq!(results.len(), 50);
        for pair in results.windows(2) {
            assert!(
                pair[0].timestamp > pair[1].timestamp,
                "expected strictly decreasing timestamps"
            );
        }
    }

    #[tokio::test]
    async fn query_filters_by_family_type_actor_and_window() {
        let log = AuditLog::new(None);
        log.append(event(
            AuditEventType::AuthFailure,
            "NODE-ALPHA",
            AuditOutcome::Failure,
        ))
        .await
        .unwrap();
        log.append(event(
            AuditEventType::MessageSubmitted,
            "NODE-BRAVO",
            AuditOutcome::Success,
        ))
        .await
        .unwrap();

        let by_family = log
            .query(&AuditQuery {
                control_family: Some(ControlFamily::Ia),
                ..Default::default()
            })
            .await;
        assert_eq!(by_family.len(), 1);
        assert_eq!(by_family[0].event_type, AuditEventType::AuthFailure);

        let by_actor = log
            .query(&AuditQuery {
                node_id: Some("NODE-BRAVO".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_actor.len(), 1);

        let in_future = log
            .query(&AuditQuery {
                start_time: Some(Utc::now() + chrono::Duration::hours(1)),
                ..Default::default()
            })
            .await;
        assert!(in_future.is_empty());

        let unknown_actor = log
            .query(&AuditQuery {
                node_id: Some("NODE-ZULU".to_string()),
                ..Default::default()
            })
            .await;
        assert!(unknown_actor.is_empty());
    }

    #[tokio::test]
    async fn trail_returns_causal_order_for_one_message() {
        let log = AuditLog::new(None);
        let id = Uuid::new_v4();
        for event_type in [
            AuditEventType::MessageSubmitted,
            AuditEventType::MessageDelivered,
        ] {
            log.append(AuditEvent::new(
                event_type,
                AuditActor::system(),
                AuditAction::new("DISPATCH", message_resource(id), AuditOutcome::Success),
                serde_json::Value::Null,
            ))
            .await
            .unwrap();
        }
        // Unrelated message, must not show up in the trail
        log.append(AuditEvent::new(
            AuditEventType::MessageSubmitted,
            AuditActor::system(),
            AuditAction::new(
                "SUBMIT",
                message_resource(Uuid::new_v4()),
                AuditOutcome::Success,
            ),
            serde_json::Value::Null,
        ))
        .await
        .unwrap();

        let trail = log.trail(id).await;
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].event_type, AuditEventType::MessageSubmitted);
        assert_eq!(trail[1].event_type, AuditEventType::MessageDelivered);
        assert!(trail[0].timestamp < trail[1].timestamp);
    }

    #[tokio::test]
    async fn persists_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(Some(dir.path().to_path_buf()));
        log.append(event(
            AuditEventType::TokenIssued,
            "NODE-ALPHA",
            AuditOutcome::Success,
        ))
        .await
        .unwrap();
        log.append(event(
            AuditEventType::AuthFailure,
            "NODE-BRAVO",
            AuditOutcome::Failure,
        ))
        .await
        .unwrap();

        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(files.pop().unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("TOKEN_ISSUED"));
        assert!(lines[1].contains("AUTH_FAILURE"));
    }

    #[tokio::test]
    async fn stats_aggregate_by_family_outcome_and_actor() {
        let log = AuditLog::new(None);
        for _ in 0..3 {
            log.append(event(
                AuditEventType::MessageSubmitted,
                "NODE-ALPHA",
                AuditOutcome::Success,
            ))
            .await
            .unwrap();
        }
        log.append(event(
            AuditEventType::AuthFailure,
            "NODE-BRAVO",
            AuditOutcome::Failure,
        ))
        .await
        .unwrap();

        let stats = log.stats().await;
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.by_control_family.get("AU"), Some(&3));
        assert_eq!(stats.by_control_family.get("IA"), Some(&1));
        assert_eq!(stats.by_outcome.get("FAILURE"), Some(&1));
        assert_eq!(stats.top_actors[0].node_id, "NODE-ALPHA");
    }

    #[test]
    fn event_types_map_to_their_families() {
        assert_eq!(AuditEventType::RbacCheck.family(), ControlFamily::Ac);
        assert_eq!(AuditEventType::MessageExpired.family(), ControlFamily::Au);
        assert_eq!(AuditEventType::TokenIssued.family(), ControlFamily::Ia);
        assert_eq!(AuditEventType::KeyRotate.family(), ControlFamily::Sc);
        assert_eq!(AuditEventType::ValidationFailure.family(), ControlFamily::Si);
    }

    #[test]
    fn event_serialization_uses_wire_names() {
        let e = event(
            AuditEventType::IntegrityCheck,
            "NODE-ALPHA",
            AuditOutcome::Failure,
        );
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"INTEGRITY_CHECK\""));
        assert!(json.contains("\"SI\""));
        assert!(json.contains("\"FAILURE\""));
    }
}
