//! Flooding and link-state routing algorithms for mesh.
//!
//! Each node runs exactly one [`RoutingAlgorithm`]. Algorithms react to
//! inbound messages, run their own periodic tasks, mutate the shared routing
//! table and hand outbound work back to the node runtime as
//! [`NodeCommand`]s, which the runtime executes without blocking the handler.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dijkstra;
pub mod flooding;
pub mod link_state;
pub mod router;
pub mod seen;

pub use dijkstra::*;
pub use flooding::*;
pub use link_state::*;
pub use router::*;
pub use seen::*;
