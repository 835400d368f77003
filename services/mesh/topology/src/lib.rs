//! Routing table, neighbor liveness timers and shortest-path snapshots for mesh.
//!
//! This crate holds the per-node view of the network: an adjacency table
//! whose own-neighbor entries carry liveness timers, and a Dijkstra engine
//! that computes shortest paths over point-in-time snapshots of that table.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod shortest_path;
pub mod table;

pub use shortest_path::*;
pub use table::*;
