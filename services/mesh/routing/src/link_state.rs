//! Link-state routing.
//!
//! Each node probes its static neighbors with hellos, ages its own neighbor
//! entries once per sweep tick and floods its own edges to the network.
//! Learned edges are reflooded only when they change the table. A neighbor
//! that misses hellos for the configured number of ticks is declared dead and
//! a death notice (an advert with a negative weight) removes it everywhere.

use crate::dijkstra::ShortestPathEngine;
use crate::router::{periodic, AlgorithmKind, Lifecycle, NodeContext, RoutingAlgorithm};
use async_trait::async_trait;
use mesh_topology::{compute, NeighborRefresh, ShortestPaths, NEIGHBOR_TIMEOUT_TICKS};
use mesh_wire::{DataMessage, Hello, LinkStateAdvert, Message, NodeId};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Link-state timing configuration
#[derive(Debug, Clone)]
pub struct LinkStateConfig {
    /// Period between hellos to each static neighbor
    pub hello_interval: Duration,
    /// Period of one liveness tick
    pub sweep_interval: Duration,
    /// Ticks without a hello before a neighbor is declared dead
    pub neighbor_timeout_ticks: u32,
    /// Period between shortest-path reports
    pub shortest_path_interval: Duration,
    /// Period between re-advertisements of the node's own edges
    pub advertise_interval: Duration,
}

impl Default for LinkStateConfig {
    fn default() -> Self {
        Self {
            hello_interval: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
            neighbor_timeout_ticks: NEIGHBOR_TIMEOUT_TICKS,
            shortest_path_interval: Duration::from_secs(15),
            advertise_interval: Duration::from_secs(15),
        }
    }
}

/// Link-state routing algorithm
pub struct LinkState {
    ctx: NodeContext,
    config: LinkStateConfig,
    engine: ShortestPathEngine,
    lifecycle: Lifecycle,
}

impl LinkState {
    /// Create a new link-state instance
    pub fn new(ctx: NodeContext, config: LinkStateConfig) -> Self {
        let engine = ShortestPathEngine::new(ctx.node_id(), ctx.table().clone());
        Self {
            ctx,
            config,
            engine,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Send a hello to every static neighbor
    pub fn send_hellos(&self) {
        let node_id = self.ctx.node_id();
        for (neighbor, &cost) in self.ctx.neighbors() {
            self.ctx
                .send(Message::Hello(Hello::new(node_id, neighbor.as_str(), cost)), neighbor);
        }
    }

    /// Flood every edge in the local row to all neighbors
    pub async fn advertise_own_edges(&self) {
        let edges = self.ctx.table().read().await.neighbors();
        let node_id = self.ctx.node_id();

        debug!("Node {} advertising {} own edges", node_id, edges.len());
        for (neighbor, weight) in edges {
            self.ctx.flood(
                Message::Advert(LinkStateAdvert::new(node_id, neighbor, weight)),
                None,
            );
        }
    }

    /// Age own-neighbor timers by one tick and announce any expired neighbor
    pub async fn decrement_timers(&self) -> Vec<NodeId> {
        let (expired, neighbors) = {
            let mut table = self.ctx.table().write().await;
            let expired = table.tick_timers();
            (expired, table.neighbor_ids())
        };

        let node_id = self.ctx.node_id();
        for dead in &expired {
            warn!(
                "Node {} lost neighbor {}: no hello for {} ticks",
                node_id, dead, self.config.neighbor_timeout_ticks
            );
            for neighbor in &neighbors {
                self.ctx.send(
                    Message::Advert(LinkStateAdvert::death_notice(node_id, dead.as_str())),
                    neighbor,
                );
            }
        }

        expired
    }

    async fn handle_hello(&self, hello: Hello) {
        let node_id = self.ctx.node_id();
        if hello.to != node_id {
            debug!("Node {} ignoring hello addressed to {}", node_id, hello.to);
            return;
        }
        // Negative weights are death notices on the wire
        if hello.cost < 0 {
            warn!(
                "Node {} ignoring hello from {} with negative cost {}",
                node_id, hello.from, hello.cost
            );
            return;
        }

        let refresh = self.ctx.table().write().await.refresh_neighbor(
            &hello.from,
            hello.cost,
            self.config.neighbor_timeout_ticks,
        );

        match refresh {
            NeighborRefresh::Refreshed => debug!("Node {} hello from {}", node_id, hello.from),
            NeighborRefresh::Reconnected => {
                info!("Node {} reconnected with neighbor {}", node_id, hello.from);
                self.advertise_own_edges().await;
            }
        }
    }

    async fn handle_advert(&self, advert: LinkStateAdvert) {
        if advert.is_death_notice() {
            self.handle_death(&advert.from, &advert.to).await;
            return;
        }

        let node_id = self.ctx.node_id();
        if advert.from == node_id {
            debug!("Node {} ignoring advert of its own edge to {}", node_id, advert.to);
            return;
        }

        let changed = {
            let mut table = self.ctx.table().write().await;
            let changed = table.set_learned(&advert.from, &advert.to, advert.weight);
            if changed {
                debug!("Node {} routing table:\n{}", node_id, table.to_pretty_json());
            }
            changed
        };

        if !changed {
            debug!(
                "Node {} discarding known edge {} -> {} ({})",
                node_id, advert.from, advert.to, advert.weight
            );
            return;
        }

        info!(
            "Node {} learned edge {} -> {} with weight {}",
            node_id, advert.from, advert.to, advert.weight
        );
        let origin = advert.from.clone();
        self.ctx.flood(Message::Advert(advert), Some(&origin));
    }

    async fn handle_death(&self, reporter: &str, dead: &str) {
        let node_id = self.ctx.node_id();
        if dead == node_id {
            info!("Node {} ignoring death notice about itself from {}", node_id, reporter);
            return;
        }

        let (changed, neighbors) = {
            let mut table = self.ctx.table().write().await;
            let changed = table.remove_node(dead);
            if changed {
                debug!("Node {} routing table:\n{}", node_id, table.to_pretty_json());
            }
            (changed, table.neighbor_ids())
        };

        if !changed {
            debug!("Node {} already forgot {}", node_id, dead);
            return;
        }

        info!("Node {} removed {} (reported dead by {})", node_id, dead, reporter);
        for neighbor in neighbors.iter().filter(|n| n.as_str() != reporter) {
            self.ctx.send(
                Message::Advert(LinkStateAdvert::death_notice(node_id, dead)),
                neighbor,
            );
        }
    }

    async fn handle_data(&self, mut data: DataMessage) {
        let node_id = self.ctx.node_id();

        if data.to == node_id {
            info!(
                "Node {} received message from {}: {}",
                node_id, data.from, data.payload
            );
            self.ctx.deliver(data);
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

        let next_hop = {
            let table = self.ctx.table().read().await;
            compute(&table, node_id).next_hop(&data.to).cloned()
        };

        match next_hop {
            Some(hop) => {
                debug!("Node {} forwarding message for {} via {}", node_id, data.to, hop);
                self.ctx.send(Message::Data(data), &hop);
            }
            None => warn!("Node {} has no route to {}, dropping message", node_id, data.to),
        }
    }

    async fn hello_loop(&self) {
        let mut ticker = periodic(self.config.hello_interval, true);
        while self.lifecycle.tick(&mut ticker).await {
            self.send_hellos();
        }
    }

    async fn sweep_loop(&self) {
        let mut ticker = periodic(self.config.sweep_interval, false);
        while self.lifecycle.tick(&mut ticker).await {
            self.decrement_timers().await;
        }
    }

    async fn advertise_loop(&self) {
        let mut ticker = periodic(self.config.advertise_interval, false);
        while self.lifecycle.tick(&mut ticker).await {
            self.advertise_own_edges().await;
        }
    }

    async fn shortest_path_loop(&self) {
        let mut ticker = periodic(self.config.shortest_path_interval, false);
        while self.lifecycle.tick(&mut ticker).await {
            self.engine.recompute().await;
        }
    }
}

#[async_trait]
impl RoutingAlgorithm for LinkState {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::LinkState
    }

    async fn start(&self) {
        if !self.lifecycle.begin() {
            return;
        }
        info!("Node {} started link-state routing", self.ctx.node_id());

        self.advertise_own_edges().await;
        tokio::join!(
            self.hello_loop(),
            self.sweep_loop(),
            self.advertise_loop(),
            self.shortest_path_loop()
        );
        debug!("Node {} link-state stopped", self.ctx.node_id());
    }

    async fn handle(&self, message: Message) {
        match message {
            Message::Hello(hello) => self.handle_hello(hello).await,
            Message::Advert(advert) => self.handle_advert(advert).await,
            Message::Data(data) => self.handle_data(data).await,
        }
    }

    fn shutdown(&self) {
        self.lifecycle.stop();
    }

    async fn shortest_paths(&self) -> Option<ShortestPaths> {
        self.engine.latest().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::testing::{context, drain};
    use crate::router::NodeCommand;
    use std::sync::Arc;

    fn link_state(
        node_id: &str,
        neighbors: &[(&str, i64)],
    ) -> (LinkState, tokio::sync::mpsc::UnboundedReceiver<NodeCommand>) {
        let (ctx, rx) = context(node_id, neighbors);
        (LinkState::new(ctx, LinkStateConfig::default()), rx)
    }

    fn death(reporter: &str, dead: &str) -> Message {
        Message::Advert(LinkStateAdvert::death_notice(reporter, dead))
    }

    fn send(message: Message, to: &str) -> NodeCommand {
        NodeCommand::Send { message, to: to.to_string() }
    }

    #[tokio::test]
    async fn test_hello_resets_timer() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        for _ in 0..10 {
            ls.decrement_timers().await;
        }
        ls.handle(Message::Hello(Hello::new("B", "A", 1))).await;

        let table = ls.ctx.table().read().await;
        assert_eq!(table.entry("A", "B").and_then(|e| e.timer), Some(NEIGHBOR_TIMEOUT_TICKS));
        drop(table);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_hello_for_other_node_ignored() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        ls.handle(Message::Hello(Hello::new("C", "B", 1))).await;

        assert!(ls.ctx.table().read().await.entry("A", "C").is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_timeout_sends_death_notices() {
        let (ls, mut rx) = link_state("A", &[("B", 1), ("C", 2)]);

        for _ in 0..14 {
            ls.handle(Message::Hello(Hello::new("C", "A", 2))).await;
            assert!(ls.decrement_timers().await.is_empty());
        }
        ls.handle(Message::Hello(Hello::new("C", "A", 2))).await;
        assert_eq!(ls.decrement_timers().await, vec!["B".to_string()]);

        assert_eq!(drain(&mut rx), vec![send(death("A", "B"), "C")]);
        assert!(!ls.ctx.table().read().await.references("B"));
    }

    #[tokio::test]
    async fn test_reconnect_readvertises() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        for _ in 0..NEIGHBOR_TIMEOUT_TICKS {
            ls.decrement_timers().await;
        }
        drain(&mut rx);

        ls.handle(Message::Hello(Hello::new("B", "A", 1))).await;

        assert_eq!(
            drain(&mut rx),
            vec![NodeCommand::Flood {
                message: Message::Advert(LinkStateAdvert::new("A", "B", 1)),
                exclude: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_advert_learned_once() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);
        let advert = Message::Advert(LinkStateAdvert::new("C", "D", 3));

        ls.handle(advert.clone()).await;
        ls.handle(advert.clone()).await;

        assert_eq!(ls.ctx.table().read().await.weight("C", "D"), Some(3));
        assert_eq!(
            drain(&mut rx),
            vec![NodeCommand::Flood { message: advert, exclude: Some("C".to_string()) }]
        );

        // A changed weight is news again
        ls.handle(Message::Advert(LinkStateAdvert::new("C", "D", 7))).await;
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn test_advert_of_own_edge_ignored() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        ls.handle(Message::Advert(LinkStateAdvert::new("A", "B", 9))).await;

        let table = ls.ctx.table().read().await;
        assert_eq!(table.entry("A", "B").and_then(|e| e.timer), Some(NEIGHBOR_TIMEOUT_TICKS));
        assert_eq!(table.weight("A", "B"), Some(1));
        drop(table);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_death_notice_propagates_once() {
        let (ls, mut rx) = link_state("A", &[("B", 1), ("D", 1)]);
        ls.ctx.table().write().await.set_learned("B", "C", 2);
        ls.ctx.table().write().await.set_learned("C", "B", 2);

        ls.handle(death("B", "C")).await;
        assert!(!ls.ctx.table().read().await.references("C"));
        assert_eq!(drain(&mut rx), vec![send(death("A", "C"), "D")]);

        ls.handle(death("D", "C")).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_death_notice_about_self_ignored() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        ls.handle(death("B", "A")).await;

        assert_eq!(ls.ctx.table().read().await.weight("A", "B"), Some(1));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_data_forwarded_along_shortest_path() {
        let (ls, mut rx) = link_state("A", &[("B", 1), ("C", 5)]);
        ls.handle(Message::Advert(LinkStateAdvert::new("B", "C", 2))).await;
        drain(&mut rx);

        let data = DataMessage::new("X", "C", "hi", 4);
        ls.handle(Message::Data(data.clone())).await;

        let mut forwarded = data.clone();
        forwarded.ttl = 3;
        assert_eq!(drain(&mut rx), vec![send(Message::Data(forwarded), "B")]);

        ls.handle(Message::Data(DataMessage::new("X", "Z", "hi", 4))).await;
        assert!(drain(&mut rx).is_empty());

        ls.handle(Message::Data(DataMessage::new("X", "C", "hi", 1))).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_minimum_ttl_from_wire_is_dropped() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        let message = mesh_wire::decode(
            br#"{"type":"message","from":"X","to":"B","payload":"hi",
                "ttl":-9223372036854775808,"timestamp":1700000000}"#,
        )
        .unwrap()
        .unwrap();
        ls.handle(message).await;

        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_negative_cost_hello_ignored() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);

        for _ in 0..NEIGHBOR_TIMEOUT_TICKS {
            ls.decrement_timers().await;
        }
        drain(&mut rx);

        ls.handle(Message::Hello(Hello::new("B", "A", -1))).await;

        assert!(ls.ctx.table().read().await.entry("A", "B").is_none());
        assert!(drain(&mut rx).is_empty());

        // A refresh with a bad cost leaves the known weight alone
        ls.handle(Message::Hello(Hello::new("B", "A", 1))).await;
        drain(&mut rx);
        ls.handle(Message::Hello(Hello::new("B", "A", -5))).await;
        assert_eq!(ls.ctx.table().read().await.weight("A", "B"), Some(1));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_data_for_self_delivered() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);
        let data = DataMessage::new("B", "A", "hi", 1);

        ls.handle(Message::Data(data.clone())).await;

        assert_eq!(drain(&mut rx), vec![NodeCommand::Deliver(data)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_advertises_and_says_hello() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);
        let ls = Arc::new(ls);

        let runner = {
            let ls = Arc::clone(&ls);
            tokio::spawn(async move { ls.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let commands = drain(&mut rx);
        assert!(commands.contains(&NodeCommand::Flood {
            message: Message::Advert(LinkStateAdvert::new("A", "B", 1)),
            exclude: None,
        }));
        assert!(commands.contains(&send(Message::Hello(Hello::new("A", "B", 1)), "B")));

        ls.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_neighbor_expires_while_running() {
        let (ls, mut rx) = link_state("A", &[("B", 1)]);
        let ls = Arc::new(ls);

        let runner = {
            let ls = Arc::clone(&ls);
            tokio::spawn(async move { ls.start().await })
        };

        tokio::time::sleep(Duration::from_millis(14_500)).await;
        assert!(ls.ctx.table().read().await.entry("A", "B").is_some());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(ls.ctx.table().read().await.entry("A", "B").is_none());

        ls.shutdown();
        runner.await.unwrap();
        drain(&mut rx);
    }
}
