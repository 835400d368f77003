//! Pub/sub transports and the node runtime for mesh.
//!
//! A node owns one channel named after its identity. It subscribes to that
//! channel, decodes whatever arrives and hands it to its routing algorithm;
//! sending to a neighbor means publishing to the neighbor's channel.
//!
//! ## Features
//!
//! - **Transport trait**: `connect` / `publish` / `subscribe` / `close`
//! - **Memory bus**: in-process transport for tests and simulations
//! - **Redis**: pub/sub transport behind the `redis-transport` feature
//! - **Node runtime**: receive loop, algorithm tasks and command worker
//!
//! ## Example
//!
//! ```rust,no_run
//! use mesh_routing::AlgorithmKind;
//! use mesh_session::{MemoryBus, Node, NodeConfig};
//! use mesh_topology::NeighborSet;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), mesh_session::NodeError> {
//! let bus = MemoryBus::new();
//! let neighbors: NeighborSet = [("B".to_string(), 1)].into_iter().collect();
//!
//! let node = Node::new(
//!     "A",
//!     neighbors,
//!     AlgorithmKind::LinkState,
//!     Arc::new(bus.transport()),
//!     NodeConfig::default(),
//! );
//!
//! let handle = tokio::spawn(Arc::clone(&node).run());
//! // ...
//! node.stop();
//! # let _ = handle.await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod node;
#[cfg(feature = "redis-transport")]
pub mod redis_transport;
pub mod transport;

pub use memory::*;
pub use node::*;
#[cfg(feature = "redis-transport")]
pub use redis_transport::*;
pub use transport::*;
