use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::message::Precedence;

// ============================================================================
// Node Registry
// ============================================================================
//
// Liveness tracking for tactical nodes. `last_seen` is bumped on every
// authenticated request from a node; CONNECTED is a pure function of
// `last_seen` against the heartbeat threshold, never stored.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    /// Delivery address, set by heartbeat registration or seeding. A node
    /// without an address can submit but cannot receive.
    pub address: Option<String>,
    pub last_seen: DateTime<Utc>,
    pub capabilities: Vec<Precedence>,
}

/// External view with the derived status.
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    pub node_id: String,
    pub address: Option<String>,
    pub status: NodeStatus,
    pub last_seen: DateTime<Utc>,
    pub capabilities: Vec<Precedence>,
}

pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeRecord>>,
    heartbeat_threshold: Duration,
}

impl NodeRegistry {
    pub fn new(heartbeat_threshold_secs: i64) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            heartbeat_threshold: Duration::seconds(heartbeat_threshold_secs),
        }
    }

    fn status(&self, record: &NodeRecord, now: DateTime<Utc>) -> NodeStatus {
        if now - record.last_seen <= self.heartbeat_threshold {
            NodeStatus::Connected
        } else {
            NodeStatus::Disconnected
        }
    }

    /// Bump `last_seen` for a node observed on an authenticated request,
    /// creating a bare record on first sight.
    pub async fn observe(&self, node_id: &str) {
        let mut nodes = self.nodes.write().await;
        let now = Utc::now();
        nodes
            .entry(node_id.to_string())
            .and_modify(|record| record.last_seen = now)
            .or_insert_with(|| NodeRecord {
                node_id: node_id.to_string(),
                address: None,
                last_seen: now,
                capabilities: Precedence::ALL.to_vec(),
            });
    }

    /// Full registration via heartbeat: delivery address plus the precedences
    /// the node advertises it can receive.
    pub async fn register(
        &self,
        node_id: &str,
        address: Option<String>,
        capabilities: Option<Vec<Precedence>>,
    ) {
        let mut nodes = self.nodes.write().await;
        let now = Utc::now();
        let record = nodes
            .entry(node_id.to_string())
            .or_insert_with(|| NodeRecord {
                node_id: node_id.to_string(),
                address: None,
                last_seen: now,
                capabilities: Precedence::ALL.to_vec(),
            });
        record.last_seen = now;
        if address.is_some() {
            record.address = address;
        }
        if let Some(capabilities) = capabilities {
            record.capabilities = capabilities;
        }
    }

    pub async fn list(&self) -> Vec<NodeView> {
        let nodes = self.nodes.read().await;
        let now = Utc::now();
        let mut views: Vec<NodeView> = nodes
            .values()
            .map(|record| NodeView {
                node_id: record.node_id.clone(),
                address: record.address.clone(),
                status: self.status(record, now),
                last_seen: record.last_seen,
                capabilities: record.capabilities.clone(),
            })
            .collect();
        views.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        views
    }

    /// Delivery address of a node, if it is currently CONNECTED, has one
    /// registered, and advertises the given precedence.
    pub async fn delivery_address(
        &self,
        node_id: &str,
        precedence: Precedence,
    ) -> Option<String> {
        let nodes = self.nodes.read().await;
        let record = nodes.get(node_id)?;
        if self.status(record, Utc::now()) != NodeStatus::Connected {
            return None;
        }
        if !record.capabilities.contains(&precedence) {
            return None;
        }
        record.address.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connected_is_a_function_of_last_seen() {
        let registry = NodeRegistry::new(60);
        registry.observe("NODE-ALPHA").await;

        let views = registry.list().await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].status, NodeStatus::Connected);

        // Age the record past the threshold by hand
        {
            let mut nodes = registry.nodes.write().await;
            nodes.get_mut("NODE-ALPHA").unwrap().last_seen =
                Utc::now() - Duration::seconds(120);
        }
        assert_eq!(registry.list().await[0].status, NodeStatus::Disconnected);

        // Any authenticated request revives it
        registry.observe("NODE-ALPHA").await;
        assert_eq!(registry.list().await[0].status, NodeStatus::Connected);
    }

    #[tokio::test]
    async fn delivery_address_requires_connection_address_and_capability() {
        let registry = NodeRegistry::new(60);
        registry.observe("NODE-ALPHA").await;
        assert_eq!(
            registry
                .delivery_address("NODE-ALPHA", Precedence::Flash)
                .await,
            None,
            "no address registered yet"
        );

        registry
            .register(
                "NODE-ALPHA",
                Some("http://10.0.1.50:9000".to_string()),
                Some(vec![Precedence::Flash, Precedence::Immediate]),
            )
            .await;

        assert_eq!(
            registry
                .delivery_address("NODE-ALPHA", Precedence::Flash)
                .await
                .as_deref(),
            Some("http://10.0.1.50:9000")
        );
        assert_eq!(
            registry
                .delivery_address("NODE-ALPHA", Precedence::Routine)
                .await,
            None,
            "node does not advertise ROUTINE"
        );
        assert_eq!(
            registry.delivery_address("NODE-ZULU", Precedence::Flash).await,
            None
        );
    }
}
