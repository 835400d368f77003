//! Periodic shortest-path computation.
//!
//! [`ShortestPathEngine`] snapshots the shared routing table, runs Dijkstra
//! outside the lock and keeps the latest result. The standalone [`Dijkstra`]
//! algorithm only reports paths over whatever the table already holds; it
//! never exchanges routing messages.

use crate::router::{periodic, AlgorithmKind, Lifecycle, NodeContext, RoutingAlgorithm};
use async_trait::async_trait;
use mesh_topology::{compute, SharedRoutingTable, ShortestPaths};
use mesh_wire::{Message, NodeId};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Computes and caches shortest paths from the local node
#[derive(Debug)]
pub struct ShortestPathEngine {
    node_id: NodeId,
    table: SharedRoutingTable,
    latest: RwLock<Option<ShortestPaths>>,
}

impl ShortestPathEngine {
    /// Create an engine over `table`
    pub fn new(node_id: impl Into<NodeId>, table: SharedRoutingTable) -> Self {
        Self {
            node_id: node_id.into(),
            table,
            latest: RwLock::new(None),
        }
    }

    /// Recompute from a fresh table snapshot and log the result
    pub async fn recompute(&self) -> ShortestPaths {
        let snapshot = self.table.read().await.clone();
        let paths = compute(&snapshot, &self.node_id);

        info!("{}", paths.report().trim_end());
        *self.latest.write().await = Some(paths.clone());
        paths
    }

    /// Result of the last recompute
    pub async fn latest(&self) -> Option<ShortestPaths> {
        self.latest.read().await.clone()
    }
}

/// Shortest-path reporting without any routing protocol
pub struct Dijkstra {
    ctx: NodeContext,
    interval: Duration,
    engine: ShortestPathEngine,
    lifecycle: Lifecycle,
}

impl Dijkstra {
    /// Create a standalone Dijkstra instance reporting every `interval`
    pub fn new(ctx: NodeContext, interval: Duration) -> Self {
        let engine = ShortestPathEngine::new(ctx.node_id(), ctx.table().clone());
        Self {
            ctx,
            interval,
            engine,
            lifecycle: Lifecycle::new(),
        }
    }
}

#[async_trait]
impl RoutingAlgorithm for Dijkstra {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::Dijkstra
    }

    async fn start(&self) {
        if !self.lifecycle.begin() {
            return;
        }
        info!("Node {} started dijkstra reporting", self.ctx.node_id());

        let mut ticker = periodic(self.interval, false);
        while self.lifecycle.tick(&mut ticker).await {
            self.engine.recompute().await;
        }
        debug!("Node {} dijkstra stopped", self.ctx.node_id());
    }

    async fn handle(&self, message: Message) {
        debug!(
            "Node {} ignoring {} message under dijkstra",
            self.ctx.node_id(),
            message.kind()
        );
    }

    fn shutdown(&self) {
        self.lifecycle.stop();
    }

    async fn shortest_paths(&self) -> Option<ShortestPaths> {
        self.engine.latest().await
    }
}
