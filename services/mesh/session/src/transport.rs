//! Transport abstraction over a channel-addressed pub/sub system

use async_trait::async_trait;
use bytes::Bytes;
use mesh_wire::WireError;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered messages per subscription before publishers start losing them
pub const SUBSCRIPTION_BUFFER: usize = 1024;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Operation attempted before `connect` or after `close`
    #[error("transport is not connected")]
    NotConnected,
    /// The backend could not be reached
    #[error("failed to connect: {0}")]
    Connect(String),
    /// A publish failed
    #[error("failed to publish to channel {channel}: {reason}")]
    Publish {
        /// Target channel
        channel: String,
        /// Backend error text
        reason: String,
    },
    /// A subscribe failed
    #[error("failed to subscribe to channel {channel}: {reason}")]
    Subscribe {
        /// Requested channel
        channel: String,
        /// Backend error text
        reason: String,
    },
    /// A message could not be encoded
    #[error("failed to encode message: {0}")]
    Encode(#[from] WireError),
    /// Redis client error
    #[cfg(feature = "redis-transport")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// One message received on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Channel the message arrived on
    pub channel: String,
    /// Raw message bytes
    pub payload: Bytes,
}

/// Outcome of waiting on a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    /// A message arrived
    Message(Envelope),
    /// Nothing arrived before the timeout
    Idle,
    /// The subscription ended
    Closed,
}

/// Inbound stream for one subscribed channel
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// Wrap the receiving end of a channel feed
    pub fn new(channel: impl Into<String>, rx: mpsc::Receiver<Envelope>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    /// Subscribed channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait up to `timeout` for the next message
    pub async fn next(&mut self, timeout: Duration) -> PollResult {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(envelope)) => PollResult::Message(envelope),
            Ok(None) => PollResult::Closed,
            Err(_) => PollResult::Idle,
        }
    }
}

/// Channel-addressed publish/subscribe transport
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establish the connection; the only fatal step of node startup
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish `payload` to `channel`, returning how many subscribers got it
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, TransportError>;

    /// Subscribe to `channel`
    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError>;

    /// Release the connection and end all subscriptions
    async fn close(&self);
}
