//! Routing table with per-edge liveness timers.
//!
//! Rows are keyed by edge source, columns by edge target. Only entries in the
//! local node's own row carry a timer; edges learned from adverts never age
//! out on their own and disappear only through death propagation.

use mesh_wire::NodeId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Ticks a direct neighbor survives without a hello
pub const NEIGHBOR_TIMEOUT_TICKS: u32 = 15;

/// Static neighbor -> cost mapping fixed at node construction
pub type NeighborSet = BTreeMap<NodeId, i64>;

/// Routing table shared between a node's tasks
pub type SharedRoutingTable = Arc<RwLock<RoutingTable>>;

/// Weight of one edge plus its liveness timer, if it is a direct-neighbor edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableEntry {
    /// Edge cost
    pub weight: i64,
    /// Remaining liveness ticks (own neighbors only)
    #[serde(rename = "time", skip_serializing_if = "Option::is_none")]
    pub timer: Option<u32>,
}

impl TableEntry {
    /// Entry for an edge learned from an advert
    pub fn learned(weight: i64) -> Self {
        Self { weight, timer: None }
    }

    /// Entry for a direct neighbor with a fresh timer
    pub fn neighbor(weight: i64, timer: u32) -> Self {
        Self {
            weight,
            timer: Some(timer),
        }
    }
}

/// Outcome of a hello refreshing the local row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborRefresh {
    /// Neighbor was already known; its timer was reset
    Refreshed,
    /// Neighbor was absent (new or previously expired) and was inserted
    Reconnected,
}

/// Adjacency table keyed by source node then target node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    #[serde(skip)]
    local_node_id: NodeId,
    #[serde(flatten)]
    rows: BTreeMap<NodeId, BTreeMap<NodeId, TableEntry>>,
}

impl RoutingTable {
    /// Create a table whose local row is seeded from the static neighbors
    pub fn new(local_node_id: impl Into<NodeId>, neighbors: &NeighborSet, timer: u32) -> Self {
        let local_node_id = local_node_id.into();
        let own_row = neighbors
            .iter()
            .map(|(neighbor, &cost)| (neighbor.clone(), TableEntry::neighbor(cost, timer)))
            .collect();

        let mut rows = BTreeMap::new();
        rows.insert(local_node_id.clone(), own_row);

        Self { local_node_id, rows }
    }

    /// Wrap the table for sharing across tasks
    pub fn into_shared(self) -> SharedRoutingTable {
        Arc::new(RwLock::new(self))
    }

    /// Local node ID
    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// Entry for the edge `from -> to`
    pub fn entry(&self, from: &str, to: &str) -> Option<&TableEntry> {
        self.rows.get(from).and_then(|row| row.get(to))
    }

    /// Weight of the edge `from -> to`
    pub fn weight(&self, from: &str, to: &str) -> Option<i64> {
        self.entry(from, to).map(|entry| entry.weight)
    }

    /// All edges leaving `node`; an empty row is distinct from `None`
    pub fn row(&self, node: &str) -> Option<&BTreeMap<NodeId, TableEntry>> {
        self.rows.get(node)
    }

    /// All rows
    pub fn rows(&self) -> &BTreeMap<NodeId, BTreeMap<NodeId, TableEntry>> {
        &self.rows
    }

    /// Iterate over every edge as `(from, to, entry)`
    pub fn edges(&self) -> impl Iterator<Item = (&NodeId, &NodeId, &TableEntry)> {
        self.rows
            .iter()
            .flat_map(|(from, row)| row.iter().map(move |(to, entry)| (from, to, entry)))
    }

    /// Number of edges in the table
    pub fn edge_count(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }

    /// Currently live direct neighbors and their costs
    pub fn neighbors(&self) -> Vec<(NodeId, i64)> {
        self.rows
            .get(&self.local_node_id)
            .map(|row| {
                row.iter()
                    .map(|(neighbor, entry)| (neighbor.clone(), entry.weight))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Currently live direct neighbor IDs
    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.neighbors().into_iter().map(|(neighbor, _)| neighbor).collect()
    }

    /// Whether any row or column mentions `node`
    pub fn references(&self, node: &str) -> bool {
        self.rows.contains_key(node) || self.rows.values().any(|row| row.contains_key(node))
    }

    /// Record a hello from `neighbor`, resetting or creating its timer
    pub fn refresh_neighbor(&mut self, neighbor: &str, cost: i64, timer: u32) -> NeighborRefresh {
        let own_row = self.rows.entry(self.local_node_id.clone()).or_default();

        match own_row.get_mut(neighbor) {
            Some(entry) if entry.timer.is_some() => {
                entry.timer = Some(timer);
                NeighborRefresh::Refreshed
            }
            _ => {
                own_row.insert(neighbor.to_string(), TableEntry::neighbor(cost, timer));
                NeighborRefresh::Reconnected
            }
        }
    }

    /// Store a learned edge; returns `false` when the weight is unchanged
    pub fn set_learned(&mut self, from: &str, to: &str, weight: i64) -> bool {
        if self.weight(from, to) == Some(weight) {
            return false;
        }

        self.rows
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string(), TableEntry::learned(weight));
        true
    }

    /// Remove `node`'s row and every column referencing it.
    ///
    /// The local row is never removed. Returns whether anything changed.
    pub fn remove_node(&mut self, node: &str) -> bool {
        if node == self.local_node_id {
            return false;
        }

        let mut changed = self.rows.remove(node).is_some();
        for row in self.rows.values_mut() {
            changed |= row.remove(node).is_some();
        }

        if changed {
            debug!("Removed node {} from routing table", node);
        }
        changed
    }

    /// Decrement every own-neighbor timer by one tick.
    ///
    /// Neighbors whose timer reaches zero are removed along with every
    /// reference to them, and returned.
    pub fn tick_timers(&mut self) -> Vec<NodeId> {
        let mut expired = Vec::new();

        if let Some(own_row) = self.rows.get_mut(&self.local_node_id) {
            for (neighbor, entry) in own_row.iter_mut() {
                if let Some(timer) = entry.timer.as_mut() {
                    *timer = timer.saturating_sub(1);
                    if *timer == 0 {
                        expired.push(neighbor.clone());
                    }
                }
            }
        }

        for dead in &expired {
            self.remove_node(dead);
        }

        expired
    }

    /// Render the table as indented JSON for logs
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self.rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbors(pairs: &[(&str, i64)]) -> NeighborSet {
        pairs.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn test_new_seeds_local_row() {
        let table = RoutingTable::new("A", &neighbors(&[("B", 1), ("C", 4)]), 15);

        assert_eq!(table.local_node_id(), "A");
        assert_eq!(table.entry("A", "B"), Some(&TableEntry::neighbor(1, 15)));
        assert_eq!(table.weight("A", "C"), Some(4));
        assert_eq!(table.edge_count(), 2);
    }

    #[test]
    fn test_empty_row_is_not_absent() {
        let table = RoutingTable::new("A", &NeighborSet::new(), 15);

        assert_eq!(table.row("A").map(|row| row.len()), Some(0));
        assert!(table.row("B").is_none());
        assert!(table.neighbors().is_empty());
    }

    #[test]
    fn test_timeout_on_fifteenth_tick() {
        let mut table = RoutingTable::new("A", &neighbors(&[("B", 1)]), NEIGHBOR_TIMEOUT_TICKS);

        for _ in 0..14 {
            assert!(table.tick_timers().is_empty());
        }
        assert_eq!(table.entry("A", "B").and_then(|e| e.timer), Some(1));

        assert_eq!(table.tick_timers(), vec!["B".to_string()]);
        assert!(!table.references("B"));
        assert_eq!(table.row("A").map(|row| row.len()), Some(0));
    }

    #[test]
    fn test_refresh_resets_without_double_count() {
        let mut table = RoutingTable::new("A", &neighbors(&[("B", 1)]), 15);

        for _ in 0..10 {
            table.tick_timers();
        }
        assert_eq!(table.refresh_neighbor("B", 1, 15), NeighborRefresh::Refreshed);
        assert_eq!(table.entry("A", "B").and_then(|e| e.timer), Some(15));

        for _ in 0..14 {
            assert!(table.tick_timers().is_empty());
        }
        assert_eq!(table.tick_timers(), vec!["B".to_string()]);

        assert_eq!(table.refresh_neighbor("B", 3, 15), NeighborRefresh::Reconnected);
        assert_eq!(table.entry("A", "B"), Some(&TableEntry::neighbor(3, 15)));
    }

    #[test]
    fn test_learned_edges_have_no_timer() {
        let mut table = RoutingTable::new("A", &neighbors(&[("B", 1)]), 15);

        assert!(table.set_learned("B", "C", 2));
        assert!(!table.set_learned("B", "C", 2));
        assert!(table.set_learned("B", "C", 5));
        assert_eq!(table.entry("B", "C"), Some(&TableEntry::learned(5)));

        for _ in 0..30 {
            table.refresh_neighbor("B", 1, 15);
            table.tick_timers();
        }
        assert_eq!(table.weight("B", "C"), Some(5));
    }

    #[test]
    fn test_remove_node_clears_row_and_columns() {
        let mut table = RoutingTable::new("A", &neighbors(&[("B", 1)]), 15);
        table.set_learned("B", "C", 2);
        table.set_learned("C", "B", 2);
        table.set_learned("C", "D", 1);
        table.set_learned("D", "C", 1);

        assert!(table.remove_node("C"));
        assert!(!table.references("C"));
        assert_eq!(table.row("B").map(|row| row.len()), Some(0));
        assert_eq!(table.row("D").map(|row| row.len()), Some(0));

        assert!(!table.remove_node("C"));
        assert!(!table.remove_node("A"));
        assert!(table.row("A").is_some());
    }

    #[test]
    fn test_pretty_json_uses_wire_names() {
        let mut table = RoutingTable::new("A", &neighbors(&[("B", 1)]), 15);
        table.set_learned("B", "C", 2);

        let value: serde_json::Value = serde_json::from_str(&table.to_pretty_json()).unwrap();
        assert_eq!(value["A"]["B"]["weight"], 1);
        assert_eq!(value["A"]["B"]["time"], 15);
        assert!(value["B"]["C"].get("time").is_none());
    }
}
