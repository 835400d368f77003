//! Wire messages and the JSON codec for the mesh routing simulator.
//!
//! Every node publishes one JSON object per message onto the channel named
//! after the receiving node. Three message kinds share the schema:
//!
//! ```text
//! {"type": "hello",   "from": "A", "to": "B", "hops": 3}
//! {"type": "message", "from": "A", "to": "B", "hops": 3}          link-state advert
//! {"type": "message", "from": "A", "to": "C", "hops": -1}         death notice for C
//! {"type": "message", "from": "A", "to": "D", "ttl": 10,
//!  "payload": "hi", "timestamp": 1700000000}                      data message
//! ```
//!
//! A `"message"` object carrying `payload` or `ttl` is a data message,
//! anything else with that type is a link-state advert.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod message;

// Re-export main types
pub use codec::{decode, encode};
pub use error::WireError;
pub use message::{
    DataMessage, Fingerprint, Hello, LinkStateAdvert, Message, NodeId, DEATH_SENTINEL,
    DEFAULT_DATA_TTL,
};
