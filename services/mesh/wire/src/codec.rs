//! JSON encoding and decoding for the wire protocol.
//!
//! Decoding is lenient about extra fields (`proto`, `headers`, ...) and
//! accepts `weight` or `cost` as aliases of the `hops` edge-cost field.

use crate::error::WireError;
use crate::message::{DataMessage, Hello, LinkStateAdvert, Message, DEFAULT_DATA_TTL};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

const TYPE_HELLO: &str = "hello";
const TYPE_MESSAGE: &str = "message";

/// Flat field-tagged representation shared by every message kind
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    to: Option<String>,
    #[serde(
        default,
        alias = "weight",
        alias = "cost",
        skip_serializing_if = "Option::is_none"
    )]
    hops: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
}

impl RawMessage {
    fn require<T>(value: Option<T>, kind: &'static str, field: &'static str) -> Result<T, WireError> {
        value.ok_or(WireError::MissingField { kind, field })
    }
}

impl From<&Message> for RawMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::Hello(hello) => RawMessage {
                kind: TYPE_HELLO.to_string(),
                from: Some(hello.from.clone()),
                to: Some(hello.to.clone()),
                hops: Some(hello.cost),
                ..Default::default()
            },
            Message::Advert(advert) => RawMessage {
                kind: TYPE_MESSAGE.to_string(),
                from: Some(advert.from.clone()),
                to: Some(advert.to.clone()),
                hops: Some(advert.weight),
                ..Default::default()
            },
            Message::Data(data) => RawMessage {
                kind: TYPE_MESSAGE.to_string(),
                from: Some(data.from.clone()),
                to: Some(data.to.clone()),
                ttl: Some(data.ttl),
                payload: Some(data.payload.clone()),
                timestamp: Some(data.timestamp),
                ..Default::default()
            },
        }
    }
}

/// Encode a message as a JSON object
pub fn encode(message: &Message) -> Result<Bytes, WireError> {
    let raw = RawMessage::from(message);
    Ok(Bytes::from(serde_json::to_vec(&raw)?))
}

/// Decode a JSON payload.
///
/// Returns `Ok(None)` for a well-formed object whose `type` is not one this
/// protocol understands.
pub fn decode(payload: &[u8]) -> Result<Option<Message>, WireError> {
    let raw: RawMessage = serde_json::from_slice(payload)?;

    let message = match raw.kind.as_str() {
        TYPE_HELLO => Message::Hello(Hello {
            from: RawMessage::require(raw.from, "hello", "from")?,
            to: RawMessage::require(raw.to, "hello", "to")?,
            cost: RawMessage::require(raw.hops, "hello", "hops")?,
        }),
        TYPE_MESSAGE if raw.payload.is_some() || raw.ttl.is_some() => Message::Data(DataMessage {
            from: RawMessage::require(raw.from, "data", "from")?,
            to: RawMessage::require(raw.to, "data", "to")?,
            ttl: raw.ttl.unwrap_or(DEFAULT_DATA_TTL),
            payload: raw.payload.unwrap_or_default(),
            timestamp: raw.timestamp.unwrap_or(0),
        }),
        TYPE_MESSAGE => Message::Advert(LinkStateAdvert {
            from: RawMessage::require(raw.from, "advert", "from")?,
            to: RawMessage::require(raw.to, "advert", "to")?,
            weight: RawMessage::require(raw.hops, "advert", "hops")?,
        }),
        other => {
            trace!("Ignoring message with unknown type {:?}", other);
            return Ok(None);
        }
    };

    Ok(Some(message))
}
