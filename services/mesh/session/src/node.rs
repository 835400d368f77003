//! Node runtime.
//!
//! A [`Node`] owns its identity, static neighbors, routing table, algorithm
//! and transport. [`Node::run`] connects, subscribes to the node's channel and
//! then drives three things concurrently until [`Node::stop`]:
//!
//! - the receive loop, decoding inbound payloads and handing them to the algorithm
//! - the algorithm's own periodic tasks
//! - the command worker, executing queued sends and floods on detached tasks

use crate::transport::{PollResult, Subscription, Transport, TransportError};
use mesh_routing::{
    build_algorithm, AlgorithmConfig, AlgorithmKind, NodeCommand, NodeContext, RoutingAlgorithm,
};
use mesh_topology::{NeighborSet, RoutingTable, SharedRoutingTable, ShortestPaths};
use mesh_wire::{decode, encode, DataMessage, Message, NodeId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, trace, warn};

/// Node runtime errors
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport connection failed at startup
    #[error("node {node} could not connect: {source}")]
    Connect {
        /// Node that failed
        node: NodeId,
        /// Transport error
        #[source]
        source: TransportError,
    },
    /// Subscribing to the node's own channel failed
    #[error("node {node} could not subscribe to its channel: {source}")]
    Subscribe {
        /// Node that failed
        node: NodeId,
        /// Transport error
        #[source]
        source: TransportError,
    },
    /// `run` was called on a node that already ran
    #[error("node {0} has already been started")]
    AlreadyStarted(NodeId),
}

/// Node runtime configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How long one subscription poll waits before looping
    pub poll_timeout: Duration,
    /// Algorithm settings
    pub algorithm: AlgorithmConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            algorithm: AlgorithmConfig::default(),
        }
    }
}

/// Message counters for one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Payloads received on the node's channel
    pub received: u64,
    /// Payloads that failed to decode
    pub malformed: u64,
    /// Successful publishes
    pub sent: u64,
    /// Failed publishes
    pub send_failures: u64,
    /// Data messages delivered locally
    pub delivered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    delivered: AtomicU64,
}

/// One simulated network node
pub struct Node {
    node_id: NodeId,
    neighbors: Arc<NeighborSet>,
    table: SharedRoutingTable,
    algorithm: Arc<dyn RoutingAlgorithm>,
    transport: Arc<dyn Transport>,
    config: NodeConfig,
    started: AtomicBool,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    commands: Mutex<Option<mpsc::UnboundedReceiver<NodeCommand>>>,
    deliveries: Mutex<Option<mpsc::UnboundedSender<DataMessage>>>,
    counters: Counters,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("neighbors", &self.neighbors)
            .field("algorithm", &self.algorithm.kind())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create a node with its table seeded from `neighbors`
    pub fn new(
        node_id: impl Into<NodeId>,
        neighbors: NeighborSet,
        kind: AlgorithmKind,
        transport: Arc<dyn Transport>,
        config: NodeConfig,
    ) -> Arc<Self> {
        let node_id = node_id.into();
        let neighbors = Arc::new(neighbors);
        let table = RoutingTable::new(
            node_id.clone(),
            &neighbors,
            config.algorithm.link_state.neighbor_timeout_ticks,
        )
        .into_shared();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let ctx = NodeContext::new(
            node_id.clone(),
            Arc::clone(&neighbors),
            Arc::clone(&table),
            commands_tx,
        );
        let algorithm = build_algorithm(kind, ctx, &config.algorithm);
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            node_id,
            neighbors,
            table,
            algorithm,
            transport,
            config,
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown,
            commands: Mutex::new(Some(commands_rx)),
            deliveries: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    /// Node ID, also the name of its channel
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Static neighbor costs
    pub fn neighbors(&self) -> &NeighborSet {
        &self.neighbors
    }

    /// Shared routing table
    pub fn table(&self) -> &SharedRoutingTable {
        &self.table
    }

    /// Active algorithm variant
    pub fn algorithm(&self) -> AlgorithmKind {
        self.algorithm.kind()
    }

    /// Whether the receive loop is active
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest shortest-path snapshot, if the algorithm computes one
    pub async fn shortest_paths(&self) -> Option<ShortestPaths> {
        self.algorithm.shortest_paths().await
    }

    /// Receive every data message delivered to this node from now on
    pub async fn subscribe_deliveries(&self) -> mpsc::UnboundedReceiver<DataMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.deliveries.lock().await = Some(tx);
        rx
    }

    /// Snapshot of the message counters
    pub fn stats(&self) -> NodeStats {
        NodeStats {
            received: self.counters.received.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
        }
    }

    /// Connect, subscribe and run until [`Node::stop`]
    pub async fn run(self: Arc<Self>) -> Result<(), NodeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted(self.node_id.clone()));
        }

        self.transport
            .connect()
            .await
            .map_err(|source| NodeError::Connect {
                node: self.node_id.clone(),
                source,
            })?;

        let subscription = match self.transport.subscribe(&self.node_id).await {
            Ok(subscription) => subscription,
            Err(source) => {
                self.transport.close().await;
                return Err(NodeError::Subscribe {
                    node: self.node_id.clone(),
                    source,
                });
            }
        };

        let Some(commands) = self.commands.lock().await.take() else {
            self.transport.close().await;
            return Err(NodeError::AlreadyStarted(self.node_id.clone()));
        };

        self.running.store(true, Ordering::SeqCst);
        info!(
            "Node {} listening on channel {} with {} routing ({} neighbors)",
            self.node_id,
            subscription.channel(),
            self.algorithm.kind(),
            self.neighbors.len()
        );

        tokio::join!(
            self.receive_loop(subscription),
            self.algorithm.start(),
            Arc::clone(&self).command_loop(commands)
        );

        self.running.store(false, Ordering::SeqCst);
        self.transport.close().await;
        info!("Node {} stopped", self.node_id);
        Ok(())
    }

    /// Stop every loop started by [`Node::run`]
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        self.algorithm.shutdown();
        debug!("Node {} stop requested", self.node_id);
    }

    /// Publish `message` to `neighbor`'s channel
    pub async fn send_message(&self, message: &Message, neighbor: &str) -> bool {
        let payload = match encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Node {} failed to encode {}: {}", self.node_id, message, e);
                return false;
            }
        };

        match self.transport.publish(neighbor, payload).await {
            Ok(receivers) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                trace!(
                    "Node {} sent {} to {} ({} receivers)",
                    self.node_id,
                    message,
                    neighbor,
                    receivers
                );
                true
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Node {} failed to send {} to {}: {}",
                    self.node_id,
                    message.kind(),
                    neighbor,
                    e
                );
                false
            }
        }
    }

    /// Send `message` to every static neighbor except `exclude`
    pub async fn flood_message(&self, message: &Message, exclude: Option<&str>) -> usize {
        let mut sent = 0;
        for neighbor in self.neighbors.keys() {
            if Some(neighbor.as_str()) == exclude {
                continue;
            }
            if self.send_message(message, neighbor).await {
                sent += 1;
            }
        }
        sent
    }

    /// Publish `message` onto this node's own channel, as if a neighbor sent it
    pub async fn inject(&self, message: &Message) -> Result<usize, TransportError> {
        inject_message(self.transport.as_ref(), &self.node_id, message).await
    }

    async fn receive_loop(&self, mut subscription: Subscription) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                result = subscription.next(self.config.poll_timeout) => match result {
                    PollResult::Message(envelope) => self.dispatch(&envelope.payload).await,
                    PollResult::Idle => continue,
                    PollResult::Closed => {
                        warn!("Node {} subscription closed", self.node_id);
                        self.stop();
                        break;
                    }
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        debug!("Node {} receive loop finished", self.node_id);
    }

    async fn dispatch(&self, payload: &[u8]) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        match decode(payload) {
            Ok(Some(message)) => {
                trace!("Node {} received {}", self.node_id, message);
                self.algorithm.handle(message).await;
            }
            Ok(None) => trace!("Node {} ignoring message of unknown type", self.node_id),
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Node {} dropping malformed message: {}", self.node_id, e);
            }
        }
    }

    async fn command_loop(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<NodeCommand>) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        let node = Arc::clone(&self);
                        tokio::spawn(async move { node.execute(command).await });
                    }
                    None => break,
                },
                _ = shutdown_rx.changed() => break,
            }
        }

        debug!("Node {} command worker finished", self.node_id);
    }

    async fn execute(&self, command: NodeCommand) {
        match command {
            NodeCommand::Send { message, to } => {
                self.send_message(&message, &to).await;
            }
            NodeCommand::Flood { message, exclude } => {
                let sent = self.flood_message(&message, exclude.as_deref()).await;
                trace!("Node {} flooded {} to {} neighbors", self.node_id, message.kind(), sent);
            }
            NodeCommand::Deliver(data) => self.deliver(data).await,
        }
    }

    async fn deliver(&self, data: DataMessage) {
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        info!(
            "Message from {} arrived at destination {}",
            data.from, self.node_id
        );

        if let Some(tx) = self.deliveries.lock().await.as_ref() {
            if tx.send(data).is_err() {
                debug!("Node {} delivery receiver dropped", self.node_id);
            }
        }
    }
}

/// Publish `message` onto `origin`'s channel so that `origin` handles it first
pub async fn inject_message(
    transport: &dyn Transport,
    origin: &str,
    message: &Message,
) -> Result<usize, TransportError> {
    let payload = encode(message)?;
    let receivers = transport.publish(origin, payload).await?;
    info!(
        "Injected {} into channel {} ({} receivers)",
        message.kind(),
        origin,
        receivers
    );
    Ok(receivers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBus;
    use bytes::Bytes;
    use mesh_routing::LinkStateConfig;
    use mesh_wire::LinkStateAdvert;
    use tokio::task::JoinHandle;

    fn neighbors(pairs: &[(&str, i64)]) -> NeighborSet {
        pairs.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    fn spawn_node(
        bus: &MemoryBus,
        node_id: &str,
        pairs: &[(&str, i64)],
        kind: AlgorithmKind,
    ) -> (Arc<Node>, JoinHandle<Result<(), NodeError>>) {
        let node = Node::new(
            node_id,
            neighbors(pairs),
            kind,
            Arc::new(bus.transport()),
            NodeConfig::default(),
        );
        let handle = tokio::spawn(Arc::clone(&node).run());
        (node, handle)
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unreachable_transport_fails_startup() {
        let bus = MemoryBus::new();
        let node = Node::new(
            "A",
            neighbors(&[("B", 1)]),
            AlgorithmKind::LinkState,
            Arc::new(bus.unreachable()),
            NodeConfig::default(),
        );

        let result = Arc::clone(&node).run().await;
        assert!(matches!(result, Err(NodeError::Connect { .. })));
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_flood_message_skips_excluded_neighbor() {
        let bus = MemoryBus::new();
        let transport = Arc::new(bus.transport());
        transport.connect().await.unwrap();
        let mut b = transport.subscribe("B").await.unwrap();
        let mut c = transport.subscribe("C").await.unwrap();

        let node = Node::new(
            "A",
            neighbors(&[("B", 1), ("C", 1), ("D", 1)]),
            AlgorithmKind::Flooding,
            transport,
            NodeConfig::default(),
        );
        let message = Message::Advert(LinkStateAdvert::new("A", "B", 1));

        // D has no subscriber but publishing still succeeds
        assert_eq!(node.flood_message(&message, Some("C")).await, 2);
        assert!(matches!(b.next(Duration::from_millis(10)).await, PollResult::Message(_)));
        assert_eq!(c.next(Duration::from_millis(10)).await, PollResult::Idle);
        assert_eq!(node.stats().sent, 2);
    }

    #[tokio::test]
    async fn test_flood_message_survives_failed_publish() {
        let bus = MemoryBus::new();
        let transport = Arc::new(bus.transport());
        transport.connect().await.unwrap();
        let mut b = transport.subscribe("B").await.unwrap();
        let mut d = transport.subscribe("D").await.unwrap();
        bus.break_channel("C");

        let node = Node::new(
            "A",
            neighbors(&[("B", 1), ("C", 1), ("D", 1)]),
            AlgorithmKind::Flooding,
            transport,
            NodeConfig::default(),
        );
        let message = Message::Data(DataMessage::new("A", "D", "hi", 5));

        assert!(!node.send_message(&message, "C").await);
        assert_eq!(node.flood_message(&message, None).await, 2);
        assert!(matches!(b.next(Duration::from_millis(10)).await, PollResult::Message(_)));
        assert!(matches!(d.next(Duration::from_millis(10)).await, PollResult::Message(_)));

        let stats = node.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.send_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_skipped() {
        let bus = MemoryBus::new();
        let (node, handle) = spawn_node(&bus, "A", &[], AlgorithmKind::Flooding);
        settle(Duration::from_millis(10)).await;

        let injector = bus.transport();
        injector.connect().await.unwrap();
        injector.publish("A", Bytes::from_static(b"not json")).await.unwrap();
        injector
            .publish("A", Bytes::from_static(br#"{"type":"bogus","from":"X","to":"A"}"#))
            .await
            .unwrap();
        settle(Duration::from_millis(10)).await;

        let stats = node.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 1);
        assert!(node.is_running());

        node.stop();
        handle.await.unwrap().unwrap();
        assert!(!node.is_running());
        assert_eq!(bus.subscriber_count("A"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flooding_delivers_once_over_diamond() {
        let bus = MemoryBus::new();
        let (a, a_handle) = spawn_node(&bus, "A", &[("B", 1), ("C", 1)], AlgorithmKind::Flooding);
        let (b, b_handle) = spawn_node(&bus, "B", &[("A", 1), ("D", 1)], AlgorithmKind::Flooding);
        let (c, c_handle) = spawn_node(&bus, "C", &[("A", 1), ("D", 1)], AlgorithmKind::Flooding);
        let (d, d_handle) = spawn_node(&bus, "D", &[("B", 1), ("C", 1)], AlgorithmKind::Flooding);
        let mut delivered = d.subscribe_deliveries().await;
        settle(Duration::from_millis(10)).await;

        let data = DataMessage::new("A", "D", "hello D", 15);
        a.inject(&Message::Data(data)).await.unwrap();
        settle(Duration::from_millis(100)).await;

        let received = delivered.try_recv().unwrap();
        assert_eq!(received.payload, "hello D");
        assert_eq!(received.from, "A");
        assert!(delivered.try_recv().is_err());
        assert_eq!(d.stats().delivered, 1);

        for node in [&a, &b, &c, &d] {
            node.stop();
        }
        for handle in [a_handle, b_handle, c_handle, d_handle] {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_state_converges_and_forgets_dead_node() {
        let bus = MemoryBus::new();
        let (a, a_handle) = spawn_node(&bus, "A", &[("B", 1)], AlgorithmKind::LinkState);
        let (b, b_handle) = spawn_node(&bus, "B", &[("A", 1), ("C", 2)], AlgorithmKind::LinkState);
        let (c, c_handle) = spawn_node(&bus, "C", &[("B", 2)], AlgorithmKind::LinkState);

        // Two advertise rounds, so the 15s shortest-path report sees the full table
        let config = LinkStateConfig::default();
        settle(config.advertise_interval * 2 + Duration::from_secs(1)).await;

        {
            let table = a.table().read().await;
            assert_eq!(table.weight("B", "C"), Some(2));
            assert_eq!(table.weight("C", "B"), Some(2));
            assert_eq!(table.weight("A", "B"), Some(1));
        }
        {
            let table = c.table().read().await;
            assert_eq!(table.weight("A", "B"), Some(1));
        }

        let paths = a.shortest_paths().await.unwrap();
        let to_c = paths.get("C").unwrap();
        assert_eq!(to_c.distance, 3);
        assert_eq!(to_c.path, vec!["A", "B", "C"]);

        c.stop();
        c_handle.await.unwrap().unwrap();

        // B times C out after the neighbor timeout, then tells A
        settle(Duration::from_secs(17)).await;

        assert!(!b.table().read().await.references("C"));
        assert!(!a.table().read().await.references("C"));
        assert_eq!(a.table().read().await.weight("A", "B"), Some(1));

        // Later advertise rounds must not bring C back
        settle(config.advertise_interval + Duration::from_secs(1)).await;
        assert!(!a.table().read().await.references("C"));
        assert!(!b.table().read().await.references("C"));

        a.stop();
        b.stop();
        a_handle.await.unwrap().unwrap();
        b_handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_state_routes_data_to_destination() {
        let bus = MemoryBus::new();
        let (a, a_handle) = spawn_node(&bus, "A", &[("B", 1)], AlgorithmKind::LinkState);
        let (b, b_handle) = spawn_node(&bus, "B", &[("A", 1), ("C", 1)], AlgorithmKind::LinkState);
        let (c, c_handle) = spawn_node(&bus, "C", &[("B", 1)], AlgorithmKind::LinkState);
        let mut delivered = c.subscribe_deliveries().await;

        settle(LinkStateConfig::default().advertise_interval + Duration::from_secs(1)).await;

        a.inject(&Message::Data(DataMessage::new("A", "C", "routed", 15)))
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;

        assert_eq!(delivered.try_recv().unwrap().payload, "routed");

        for node in [&a, &b, &c] {
            node.stop();
        }
        for handle in [a_handle, b_handle, c_handle] {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let bus = MemoryBus::new();
        let node = Node::new(
            "A",
            NeighborSet::new(),
            AlgorithmKind::Dijkstra,
            Arc::new(bus.transport()),
            NodeConfig::default(),
        );

        let handle = tokio::spawn(Arc::clone(&node).run());
        while !node.is_running() {
            tokio::task::yield_now().await;
        }

        let second = Arc::clone(&node).run().await;
        assert!(matches!(second, Err(NodeError::AlreadyStarted(_))));

        node.stop();
        handle.await.unwrap().unwrap();
    }
}
