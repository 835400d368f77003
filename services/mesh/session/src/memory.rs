//! In-process pub/sub bus.
//!
//! Every [`MemoryTransport`] created from the same [`MemoryBus`] shares its
//! channels, so a whole network of nodes can run inside one process.

use crate::transport::{Envelope, Subscription, Transport, TransportError, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

type Subscribers = Vec<(u64, mpsc::Sender<Envelope>)>;

/// Shared channel registry
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    channels: Arc<DashMap<String, Subscribers>>,
    broken: Arc<DashSet<String>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport attached to this bus
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.clone(), true)
    }

    /// Create a transport whose `connect` always fails
    pub fn unreachable(&self) -> MemoryTransport {
        MemoryTransport::new(self.clone(), false)
    }

    /// Make every publish onto `channel` fail until [`MemoryBus::repair`]
    pub fn break_channel(&self, channel: &str) {
        self.broken.insert(channel.to_string());
    }

    /// Undo [`MemoryBus::break_channel`]
    pub fn repair(&self, channel: &str) {
        self.broken.remove(channel);
    }

    /// Live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|subscribers| subscribers.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Deliver `payload` to every live subscriber of `channel`
    pub fn publish(&self, channel: &str, payload: Bytes) -> usize {
        let Some(mut subscribers) = self.channels.get_mut(channel) else {
            trace!("No subscribers on channel {}", channel);
            return 0;
        };

        subscribers.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (id, tx) in subscribers.iter() {
            let envelope = Envelope {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            match tx.try_send(envelope) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Subscriber {} on {} missed a message: {}", id, channel, e),
            }
        }
        delivered
    }

    fn register(&self, channel: &str) -> (u64, mpsc::Receiver<Envelope>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    fn unregister(&self, channel: &str, id: u64) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }
}

/// Transport handle onto a [`MemoryBus`]
#[derive(Debug)]
pub struct MemoryTransport {
    bus: MemoryBus,
    reachable: bool,
    connected: AtomicBool,
    subscriptions: Mutex<Vec<(String, u64)>>,
}

impl MemoryTransport {
    fn new(bus: MemoryBus, reachable: bool) -> Self {
        Self {
            bus,
            reachable,
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if !self.reachable {
            return Err(TransportError::Connect("memory bus unreachable".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, TransportError> {
        self.ensure_connected()?;
        if self.bus.broken.contains(channel) {
            return Err(TransportError::Publish {
                channel: channel.to_string(),
                reason: "channel is broken".to_string(),
            });
        }
        Ok(self.bus.publish(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        let (id, rx) = self.bus.register(channel);
        self.subscriptions.lock().await.push((channel.to_string(), id));
        Ok(Subscription::new(channel, rx))
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for (channel, id) in self.subscriptions.lock().await.drain(..) {
            self.bus.unregister(&channel, id);
        }
    }
}
