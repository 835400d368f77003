//! Flooding with duplicate suppression and hop limits.
//!
//! Every data message is forwarded to all static neighbors except the node
//! named as its originator. A fingerprint set stops a node from handling the
//! same message twice, and the ttl bounds how far a message can travel.

use crate::router::{AlgorithmKind, Lifecycle, NodeContext, RoutingAlgorithm};
use crate::seen::SeenMessages;
use async_trait::async_trait;
use mesh_wire::{DataMessage, Message};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Flooding configuration
#[derive(Debug, Clone)]
pub struct FloodingConfig {
    /// How long a fingerprint is remembered
    pub seen_window: Duration,
    /// Maximum remembered fingerprints
    pub seen_capacity: usize,
}

impl Default for FloodingConfig {
    fn default() -> Self {
        Self {
            seen_window: Duration::from_secs(120),
            seen_capacity: 65_536,
        }
    }
}

/// Flooding algorithm
pub struct Flooding {
    ctx: NodeContext,
    seen: Mutex<SeenMessages>,
    lifecycle: Lifecycle,
}

impl Flooding {
    /// Create a new flooding instance
    pub fn new(ctx: NodeContext, config: FloodingConfig) -> Self {
        Self {
            ctx,
            seen: Mutex::new(SeenMessages::new(config.seen_window, config.seen_capacity)),
            lifecycle: Lifecycle::new(),
        }
    }

    async fn handle_data(&self, mut data: DataMessage) {
        let node_id = self.ctx.node_id();

        if !self.seen.lock().await.insert(data.fingerprint()) {
            info!("Node {} dropping duplicate message from {}", node_id, data.from);
            return;
        }

        data.ttl = data.ttl.saturating_sub(1);
        if data.ttl <= 0 {
            info!(
                "Node {} dropping message from {} to {}: ttl expired",
                node_id, data.from, data.to
            );
            return;
        }

        if data.to == node_id {
            info!(
                "Node {} received message from {}: {}",
                node_id, data.from, data.payload
            );
            self.ctx.deliver(data);
            return;
        }

        debug!(
            "Node {} flooding message {} -> {} (ttl {})",
            node_id, data.from, data.to, data.ttl
        );
        let origin = data.from.clone();
        self.ctx.flood(Message::Data(data), Some(&origin));
    }
}

#[async_trait]
impl RoutingAlgorithm for Flooding {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Flooding
    }

    async fn start(&self) {
        if !self.lifecycle.begin() {
            return;
        }
        info!("Node {} started flooding", self.ctx.node_id());
        self.lifecycle.stopped().await;
        debug!("Node {} flooding stopped", self.ctx.node_id());
    }

    async fn handle(&self, message: Message) {
        match message {
            Message::Data(data) => self.handle_data(data).await,
            other => debug!(
                "Node {} ignoring {} message under flooding",
                self.ctx.node_id(),
                other.kind()
            ),
        }
    }

    fn shutdown(&self) {
        self.lifecycle.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::{context, drain};
    use crate::router::NodeCommand;
    use mesh_wire::{Hello, LinkStateAdvert};

    fn data(from: &str, to: &str, ttl: i64) -> DataMessage {
        DataMessage {
            from: from.to_string(),
            to: to.to_string(),
            ttl,
            payload: "hi".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_forwards_excluding_origin() {
        let (ctx, mut rx) = context("B", &[("A", 1), ("C", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());

        flooding.handle(Message::Data(data("A", "D", 5))).await;

        assert_eq!(
            drain(&mut rx),
            vec![NodeCommand::Flood {
                message: Message::Data(data("A", "D", 4)),
                exclude: Some("A".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_delivers_once_at_destination() {
        let (ctx, mut rx) = context("D", &[("B", 1), ("C", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());

        flooding.handle(Message::Data(data("A", "D", 5))).await;
        // Same message arriving over a second path
        flooding.handle(Message::Data(data("A", "D", 3))).await;

        assert_eq!(
            drain(&mut rx),
            vec![NodeCommand::Deliver(data("A", "D", 4))]
        );
    }

    #[tokio::test]
    async fn test_ttl_exhaustion_drops() {
        let (ctx, mut rx) = context("B", &[("A", 1), ("C", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());

        flooding.handle(Message::Data(data("A", "C", 1))).await;
        assert!(drain(&mut rx).is_empty());

        // Even the destination drops a message whose ttl runs out on arrival
        let (ctx, mut rx) = context("C", &[("B", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());
        flooding.handle(Message::Data(data("A", "C", 1))).await;
        flooding.handle(Message::Data(data("X", "C", 0))).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_minimum_ttl_from_wire_is_dropped() {
        let (ctx, mut rx) = context("B", &[("A", 1), ("C", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());

        let message = mesh_wire::decode(
            br#"{"type":"message","from":"A","to":"C","payload":"hi",
                "ttl":-9223372036854775808,"timestamp":1700000000}"#,
        )
        .unwrap()
        .unwrap();
        flooding.handle(message).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_is_not_reflooded() {
        let (ctx, mut rx) = context("B", &[("A", 1), ("C", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());

        flooding.handle(Message::Data(data("A", "D", 5))).await;
        flooding.handle(Message::Data(data("A", "D", 5))).await;

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_ignores_control_messages() {
        let (ctx, mut rx) = context("B", &[("A", 1)]);
        let flooding = Flooding::new(ctx, FloodingConfig::default());

        flooding.handle(Message::Hello(Hello::new("A", "B", 1))).await;
        flooding
            .handle(Message::Advert(LinkStateAdvert::new("A", "C", 2)))
            .await;

        assert!(drain(&mut rx).is_empty());
        let table = flooding.ctx.table().read().await;
        assert_eq!(table.edge_count(), 1);
    }

    #[tokio::test]
    async fn test_start_returns_after_shutdown() {
        let (ctx, _rx) = context("A", &[]);
        let flooding = std::sync::Arc::new(Flooding::new(ctx, FloodingConfig::default()));

        let runner = {
            let flooding = std::sync::Arc::clone(&flooding);
            tokio::spawn(async move { flooding.start().await })
        };
        tokio::task::yield_now().await;

        flooding.shutdown();
        runner.await.unwrap();
    }
}
