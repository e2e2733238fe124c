use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Message Domain Types
// ============================================================================
//
// Precedence, classification, and the per-message state machine. Status
// transitions are validated in one place (`MessageStatus::can_transition_to`)
// and never regress once a terminal state is reached.
//
// ============================================================================

/// Military-standard message precedence. Lower rank dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Precedence {
    Flash,
    Immediate,
    Priority,
    Routine,
}

impl Precedence {
    /// Dispatch order: every FLASH before any IMMEDIATE, and so on.
    pub const ALL: [Precedence; 4] = [
        Precedence::Flash,
        Precedence::Immediate,
        Precedence::Priority,
        Precedence::Routine,
    ];

    /// Numeric rank used in queue partition naming and logging (1 = highest).
    pub fn rank(&self) -> u8 {
        match self {
            Precedence::Flash => 1,
            Precedence::Immediate => 2,
            Precedence::Priority => 3,
            Precedence::Routine => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Precedence::Flash => "FLASH",
            Precedence::Immediate => "IMMEDIATE",
            Precedence::Priority => "PRIORITY",
            Precedence::Routine => "ROUTINE",
        }
    }

    /// Partition key in the backing list store.
    pub fn partition(&self) -> &'static str {
        match self {
            Precedence::Flash => "flash",
            Precedence::Immediate => "immediate",
            Precedence::Priority => "priority",
            Precedence::Routine => "routine",
        }
    }

    pub fn index(&self) -> usize {
        (self.rank() - 1) as usize
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FLASH" => Some(Precedence::Flash),
            "IMMEDIATE" => Some(Precedence::Immediate),
            "PRIORITY" => Some(Precedence::Priority),
            "ROUTINE" => Some(Precedence::Routine),
            _ => None,
        }
    }
}

impl std::fmt::Display for Precedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security classification label. Ordered so that a role's ceiling can be
/// compared directly (`Unclassified < Confidential < Secret < TopSecret`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Unclassified,
    Confidential,
    Secret,
    TopSecret,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Unclassified => "UNCLASSIFIED",
            Classification::Confidential => "CONFIDENTIAL",
            Classification::Secret => "SECRET",
            Classification::TopSecret => "TOP_SECRET",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "UNCLASSIFIED" => Some(Classification::Unclassified),
            "CONFIDENTIAL" => Some(Classification::Confidential),
            "SECRET" => Some(Classification::Secret),
            "TOP_SECRET" => Some(Classification::TopSecret),
            _ => None,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-message lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Queued,
    InFlight,
    Delivered,
    Failed,
    Expired,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered | MessageStatus::Failed | MessageStatus::Expired
        )
    }

    /// Valid edges of the submission state machine. Terminal states have no
    /// outgoing edges; a transient delivery failure returns InFlight to Queued.
    pub fn can_transition_to(&self, next: MessageStatus) -> bool {
        match (self, next) {
            (MessageStatus::Queued, MessageStatus::InFlight)
            | (MessageStatus::Queued, MessageStatus::Failed)
            | (MessageStatus::Queued, MessageStatus::Expired)
            | (MessageStatus::InFlight, MessageStatus::Queued)
            | (MessageStatus::InFlight, MessageStatus::Delivered)
            | (MessageStatus::InFlight, MessageStatus::Failed)
            | (MessageStatus::InFlight, MessageStatus::Expired) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "QUEUED",
            MessageStatus::InFlight => "IN_FLIGHT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Failed => "FAILED",
            MessageStatus::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authoritative submission record. The sealed payload never leaves the
/// relay except toward the recipient node and is never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub precedence: Precedence,
    pub classification: Classification,
    pub sender: String,
    pub recipient: String,
    #[serde(with = "serde_bytes_vec")]
    pub sealed_payload: Vec<u8>,
    pub submitted_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn new(
        precedence: Precedence,
        classification: Classification,
        sender: String,
        recipient: String,
        sealed_payload: Vec<u8>,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            precedence,
            classification,
            sender,
            recipient,
            sealed_payload,
            submitted_at: now,
            ttl_seconds,
            expires_at: now + chrono::Duration::seconds(ttl_seconds),
            status: MessageStatus::Queued,
            attempt_count: 0,
            next_attempt_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// External view of a message: everything except the payload.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub precedence: Precedence,
    pub classification: Classification,
    pub sender: String,
    pub recipient: String,
    pub status: MessageStatus,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
}

impl From<&MessageRecord> for MessageView {
    fn from(record: &MessageRecord) -> Self {
        Self {
            id: record.id,
            precedence: record.precedence,
            classification: record.classification,
            sender: record.sender.clone(),
            recipient: record.recipient.clone(),
            status: record.status,
            submitted_at: record.submitted_at,
            expires_at: record.expires_at,
            attempt_count: record.attempt_count,
            next_attempt_at: record.next_attempt_at,
        }
    }
}

// MessagePack stores Vec<u8> efficiently as a bin when told to; the default
// serde impl would emit a per-element sequence.
mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;
        impl<'de> serde::de::Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("byte array")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element()? {
                    out.push(byte);
                }
                Ok(out)
            }
        }
        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}
