//! Shortest-path computation over routing table snapshots.
//!
//! Every table edge is mirrored in both directions, so an edge learned only
//! as `u -> v` is still usable from `v`.

use crate::table::RoutingTable;
use mesh_wire::NodeId;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fmt::Write;
use tracing::debug;

/// Undirected weighted graph built from a routing table
pub type Graph = HashMap<NodeId, HashMap<NodeId, i64>>;

/// Distance and full path to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Total cost from the source
    pub distance: i64,
    /// Nodes visited, including source and destination
    pub path: Vec<NodeId>,
}

impl PathInfo {
    /// First node after the source
    pub fn next_hop(&self) -> Option<&NodeId> {
        self.path.get(1)
    }

    /// Number of edges on the path
    pub fn hop_count(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Result of one single-source computation; unreachable nodes are absent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortestPaths {
    source: NodeId,
    routes: BTreeMap<NodeId, PathInfo>,
}

impl ShortestPaths {
    /// Source node of the computation
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Path to `target`
    pub fn get(&self, target: &str) -> Option<&PathInfo> {
        self.routes.get(target)
    }

    /// Next hop towards `target`
    pub fn next_hop(&self, target: &str) -> Option<&NodeId> {
        self.get(target).and_then(PathInfo::next_hop)
    }

    /// All reachable destinations
    pub fn routes(&self) -> &BTreeMap<NodeId, PathInfo> {
        &self.routes
    }

    /// Number of reachable destinations
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no destination is reachable
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Human-readable listing of every route
    pub fn report(&self) -> String {
        let mut out = format!("Shortest paths from {}:\n", self.source);
        for (target, info) in &self.routes {
            let _ = writeln!(out, "  to {} (distance {}):", target, info.distance);
            for hop in info.path.iter().skip(1) {
                let _ = writeln!(out, "    -> via {}", hop);
            }
        }
        out
    }
}

/// Mirror every table edge into an undirected graph
pub fn build_graph(table: &RoutingTable) -> Graph {
    let mut graph: Graph = table
        .rows()
        .keys()
        .map(|node| (node.clone(), HashMap::new()))
        .collect();

    for (from, to, entry) in table.edges() {
        if entry.weight < 0 {
            continue;
        }
        graph
            .entry(from.clone())
            .or_default()
            .insert(to.clone(), entry.weight);
        graph
            .entry(to.clone())
            .or_default()
            .insert(from.clone(), entry.weight);
    }

    graph
}

/// Compute shortest paths from `source` using Dijkstra's algorithm
pub fn compute(table: &RoutingTable, source: &str) -> ShortestPaths {
    let graph = build_graph(table);
    compute_on_graph(&graph, source)
}

/// Dijkstra over an already-built graph
pub fn compute_on_graph(graph: &Graph, source: &str) -> ShortestPaths {
    let mut result = ShortestPaths {
        source: source.to_string(),
        routes: BTreeMap::new(),
    };

    if !graph.contains_key(source) {
        return result;
    }

    let mut distances: HashMap<&str, i64> = HashMap::new();
    let mut previous: HashMap<&str, &str> = HashMap::new();
    let mut queue: BinaryHeap<Reverse<(i64, &str)>> = BinaryHeap::new();

    distances.insert(source, 0);
    queue.push(Reverse((0, source)));

    while let Some(Reverse((current_dist, current_node))) = queue.pop() {
        // Skip stale queue entries
        if current_dist > distances.get(current_node).copied().unwrap_or(i64::MAX) {
            continue;
        }

        let Some(edges) = graph.get(current_node) else {
            continue;
        };

        for (neighbor, &weight) in edges {
            let new_dist = current_dist.saturating_add(weight);
            let existing = distances.get(neighbor.as_str()).copied().unwrap_or(i64::MAX);

            if new_dist < existing {
                distances.insert(neighbor.as_str(), new_dist);
                previous.insert(neighbor.as_str(), current_node);
                queue.push(Reverse((new_dist, neighbor.as_str())));
            }
        }
    }

    for (&target, &distance) in &distances {
        if target == source {
            continue;
        }

        let mut path = vec![target.to_string()];
        let mut current = target;
        while let Some(&prev) = previous.get(current) {
            path.push(prev.to_string());
            current = prev;
        }
        path.reverse();

        result.routes.insert(target.to_string(), PathInfo { distance, path });
    }

    debug!("Computed {} routes from node {}", result.routes.len(), source);
    result
}
