//! Message structures exchanged between nodes.

use std::fmt;

/// Node identity; doubles as the node's pub/sub channel name
pub type NodeId = String;

/// Advert weight announcing that the `to` node has died
pub const DEATH_SENTINEL: i64 = -1;

/// Hop budget assumed for data messages that arrive without a `ttl`
pub const DEFAULT_DATA_TTL: i64 = 10;

/// Liveness probe sent periodically to each direct neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Sending node
    pub from: NodeId,
    /// Neighbor the probe is addressed to
    pub to: NodeId,
    /// Cost of the link as configured on the sender
    pub cost: i64,
}

/// Announcement of one edge's current cost, flooded network-wide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStateAdvert {
    /// Edge source (or the reporting node for a death notice)
    pub from: NodeId,
    /// Edge target (or the dead node for a death notice)
    pub to: NodeId,
    /// Edge cost, negative for a death notice
    pub weight: i64,
}

/// Application payload routed through the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    /// Originating node
    pub from: NodeId,
    /// Destination node
    pub to: NodeId,
    /// Remaining hop budget
    pub ttl: i64,
    /// Application content
    pub payload: String,
    /// Creation time in epoch seconds
    pub timestamp: i64,
}

/// Content-derived identity used to suppress reprocessing of flooded data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    from: NodeId,
    to: NodeId,
    payload: String,
    timestamp: i64,
}

/// Any message carried on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Neighbor liveness probe
    Hello(Hello),
    /// Link-state advertisement or death notice
    Advert(LinkStateAdvert),
    /// Data message
    Data(DataMessage),
}

impl Hello {
    /// Create a new hello
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, cost: i64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            cost,
        }
    }
}

impl LinkStateAdvert {
    /// Create an advert for the edge `from -> to`
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, weight: i64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            weight,
        }
    }

    /// Create a death notice reported by `reporter` for `dead`
    pub fn death_notice(reporter: impl Into<NodeId>, dead: impl Into<NodeId>) -> Self {
        Self::new(reporter, dead, DEATH_SENTINEL)
    }

    /// Whether this advert announces the death of `to`
    pub fn is_death_notice(&self) -> bool {
        self.weight < 0
    }
}

impl DataMessage {
    /// Create a data message stamped with the current time
    pub fn new(
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        payload: impl Into<String>,
        ttl: i64,
    ) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        Self {
            from: from.into(),
            to: to.into(),
            ttl,
            payload: payload.into(),
            timestamp,
        }
    }

    /// Fingerprint identifying this message regardless of its remaining ttl
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            from: self.from.clone(),
            to: self.to.clone(),
            payload: self.payload.clone(),
            timestamp: self.timestamp,
        }
    }
}

impl Message {
    /// Sender recorded in the message
    pub fn from(&self) -> &str {
        match self {
            Message::Hello(hello) => &hello.from,
            Message::Advert(advert) => &advert.from,
            Message::Data(data) => &data.from,
        }
    }

    /// Recipient recorded in the message
    pub fn to(&self) -> &str {
        match self {
            Message::Hello(hello) => &hello.to,
            Message::Advert(advert) => &advert.to,
            Message::Data(data) => &data.to,
        }
    }

    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::Advert(advert) if advert.is_death_notice() => "death",
            Message::Advert(_) => "advert",
            Message::Data(_) => "data",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Hello(hello) => {
                write!(f, "hello {} -> {} (cost {})", hello.from, hello.to, hello.cost)
            }
            Message::Advert(advert) if advert.is_death_notice() => {
                write!(f, "death of {} reported by {}", advert.to, advert.from)
            }
            Message::Advert(advert) => {
                write!(f, "advert {} -> {} (weight {})", advert.from, advert.to, advert.weight)
            }
            Message::Data(data) => write!(
                f,
                "data {} -> {} (ttl {}): {}",
                data.from, data.to, data.ttl, data.payload
            ),
        }
    }
}
