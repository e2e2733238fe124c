use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;

use crate::message::Precedence;
use crate::nodes::NodeRegistry;

// ============================================================================
// Node Transport
// ============================================================================
//
// Outbound delivery from the dispatch worker. The contract is the three-way
// outcome; everything else (protocol, framing) is an implementation detail
// of the transport.
//
// ============================================================================

#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The recipient durably accepted the payload.
    Delivered,
    /// Worth retrying: recipient unreachable, timeout, 5xx.
    Transient(String),
    /// Never going to succeed as-is: the recipient rejected the message.
    Permanent(String),
}

#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn deliver(
        &self,
        recipient: &str,
        sealed_payload: &[u8],
        precedence: Precedence,
    ) -> DeliveryOutcome;
}

/// HTTP delivery to the recipient's registered address. The sealed payload
/// crosses the wire base64-encoded; the relay never re-opens it here.
pub struct HttpNodeTransport {
    client: reqwest::Client,
    registry: Arc<NodeRegistry>,
}

impl HttpNodeTransport {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry,
        }
    }
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn deliver(
        &self,
        recipient: &str,
        sealed_payload: &[u8],
        precedence: Precedence,
    ) -> DeliveryOutcome {
        let Some(address) = self.registry.delivery_address(recipient, precedence).await else {
            return DeliveryOutcome::Transient(format!(
                "recipient {recipient} is not reachable for {precedence}"
            ));
        };

        let body = serde_json::json!({
            "recipient": recipient,
            "precedence": precedence,
            "sealed_payload": BASE64.encode(sealed_payload),
        });

        let url = format!("{}/deliver", address.trim_end_matches('/'));
        match self.client.post(&url).json(&body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryOutcome::Delivered
                } else if status.is_client_error() {
                    DeliveryOutcome::Permanent(format!(
                        "recipient {recipient} rejected delivery with {status}"
                    ))
                } else {
                    DeliveryOutcome::Transient(format!(
                        "recipient {recipient} answered {status}"
                    ))
                }
            }
            Err(e) => {
                tracing::debug!(
                    recipient = %recipient,
                    error = %e,
                    "delivery attempt failed at transport level"
                );
                DeliveryOutcome::Transient(format!("transport error: {e}"))
            }
        }
    }
}
