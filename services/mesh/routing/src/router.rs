//! Routing algorithm trait, node context and outbound commands

use crate::dijkstra::Dijkstra;
use crate::flooding::{Flooding, FloodingConfig};
use crate::link_state::{LinkState, LinkStateConfig};
use async_trait::async_trait;
use mesh_topology::{NeighborSet, SharedRoutingTable, ShortestPaths};
use mesh_wire::{DataMessage, Message, NodeId};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Outbound work requested by an algorithm and executed by the node runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    /// Publish a message to one neighbor's channel
    Send {
        /// Message to publish
        message: Message,
        /// Neighbor channel
        to: NodeId,
    },
    /// Publish a message to every static neighbor except `exclude`
    Flood {
        /// Message to publish
        message: Message,
        /// Neighbor to skip
        exclude: Option<NodeId>,
    },
    /// Hand a data message addressed to this node to the application layer
    Deliver(DataMessage),
}

/// What an algorithm knows about the node it runs on
#[derive(Debug, Clone)]
pub struct NodeContext {
    node_id: NodeId,
    neighbors: Arc<NeighborSet>,
    table: SharedRoutingTable,
    commands: mpsc::UnboundedSender<NodeCommand>,
}

impl NodeContext {
    /// Create a new node context
    pub fn new(
        node_id: impl Into<NodeId>,
        neighbors: Arc<NeighborSet>,
        table: SharedRoutingTable,
        commands: mpsc::UnboundedSender<NodeCommand>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            neighbors,
            table,
            commands,
        }
    }

    /// Local node ID
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

    /// Queue a send to one neighbor
    pub fn send(&self, message: Message, to: &str) {
        self.submit(NodeCommand::Send {
            message,
            to: to.to_string(),
        });
    }

    /// Queue a flood to every neighbor except `exclude`
    pub fn flood(&self, message: Message, exclude: Option<&str>) {
        self.submit(NodeCommand::Flood {
            message,
            exclude: exclude.map(str::to_string),
        });
    }

    /// Queue a local delivery
    pub fn deliver(&self, message: DataMessage) {
        self.submit(NodeCommand::Deliver(message));
    }

    fn submit(&self, command: NodeCommand) {
        if self.commands.send(command).is_err() {
            debug!("Node {} command queue closed, dropping command", self.node_id);
        }
    }
}

/// Routing algorithm driven by the node runtime
#[async_trait]
pub trait RoutingAlgorithm: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> AlgorithmKind;

    /// Run the algorithm's periodic work until [`RoutingAlgorithm::shutdown`]
    async fn start(&self);

    /// Process one inbound message
    async fn handle(&self, message: Message);

    /// Ask every loop started by [`RoutingAlgorithm::start`] to finish
    fn shutdown(&self);

    /// Latest shortest-path snapshot, for algorithms that compute one
    async fn shortest_paths(&self) -> Option<ShortestPaths> {
        None
    }
}

/// Available routing algorithm variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmKind {
    /// Naive flooding with duplicate suppression and ttl
    Flooding,
    /// Link-state routing with hellos, adverts and death propagation
    LinkState,
    /// Periodic shortest-path reporting over the local table only
    Dijkstra,
}

/// Error returned when parsing an unknown algorithm name
#[derive(Debug, Clone, Error)]
#[error("unknown routing algorithm `{0}` (expected flooding, lsr or dijkstra)")]
pub struct ParseAlgorithmError(String);

impl FromStr for AlgorithmKind {
    type Err = ParseAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flooding" | "flood" => Ok(AlgorithmKind::Flooding),
            "lsr" | "link-state" | "link_state" | "linkstate" => Ok(AlgorithmKind::LinkState),
            "dijkstra" => Ok(AlgorithmKind::Dijkstra),
            _ => Err(ParseAlgorithmError(s.to_string())),
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmKind::Flooding => write!(f, "flooding"),
            AlgorithmKind::LinkState => write!(f, "lsr"),
            AlgorithmKind::Dijkstra => write!(f, "dijkstra"),
        }
    }
}

/// Settings for every algorithm variant
#[derive(Debug, Clone, Default)]
pub struct AlgorithmConfig {
    /// Flooding settings
    pub flooding: FloodingConfig,
    /// Link-state settings (also used by standalone Dijkstra)
    pub link_state: LinkStateConfig,
}

/// Build the algorithm selected by `kind`
pub fn build_algorithm(
    kind: AlgorithmKind,
    ctx: NodeContext,
    config: &AlgorithmConfig,
) -> Arc<dyn RoutingAlgorithm> {
    match kind {
        AlgorithmKind::Flooding => Arc::new(Flooding::new(ctx, config.flooding.clone())),
        AlgorithmKind::LinkState => Arc::new(LinkState::new(ctx, config.link_state.clone())),
        AlgorithmKind::Dijkstra => Arc::new(Dijkstra::new(
            ctx,
            config.link_state.shortest_path_interval,
        )),
    }
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Cooperative start/stop state shared by an algorithm's loops
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    shutdown: watch::Sender<bool>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(IDLE),
            shutdown,
        }
    }

    /// Move to running; fails if already started or stopped
    pub(crate) fn begin(&self) -> bool {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    pub(crate) fn stop(&self) {
        self.state.store(STOPPED, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }

    /// Wait for the next tick; `false` once the lifecycle is stopped
    pub(crate) async fn tick(&self, interval: &mut Interval) -> bool {
        let mut stop_rx = self.shutdown.subscribe();
        if *stop_rx.borrow() || !self.is_running() {
            return false;
        }

        tokio::select! {
            _ = interval.tick() => self.is_running(),
            _ = stop_rx.changed() => false,
        }
    }

    /// Resolve once the lifecycle is stopped
    pub(crate) async fn stopped(&self) {
        let mut stop_rx = self.shutdown.subscribe();
        while !*stop_rx.borrow_and_update() {
            if stop_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Interval ticking every `period`, first tick immediate or after one period
pub(crate) fn periodic(period: Duration, immediate: bool) -> Interval {
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
