//! Redis pub/sub transport.
//!
//! Publishing goes through one multiplexed connection. Each subscription gets
//! its own pub/sub connection and a pump task that forwards messages into the
//! [`Subscription`] feed.

use crate::transport::{Envelope, Subscription, Transport, TransportError, SUBSCRIPTION_BUFFER};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Optional password
    pub password: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
        }
    }
}

impl RedisSettings {
    /// Connection URL for these settings
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }

    /// Address without credentials, for logs
    pub fn display_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Transport backed by a Redis server
pub struct RedisTransport {
    settings: RedisSettings,
    client: redis::Client,
    publisher: RwLock<Option<MultiplexedConnection>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RedisTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTransport")
            .field("addr", &self.settings.display_addr())
            .finish_non_exhaustive()
    }
}

impl RedisTransport {
    /// Create a transport; no connection is made until `connect`
    pub fn new(settings: RedisSettings) -> Result<Self, TransportError> {
        let client = redis::Client::open(settings.url())?;
        Ok(Self {
            settings,
            client,
            publisher: RwLock::new(None),
            pumps: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        *self.publisher.write().await = Some(conn);
        info!("Connected to redis at {}", self.settings.display_addr());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize, TransportError> {
        let mut conn = self
            .publisher
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(&payload[..])
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::Publish {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        let subscribe_error = |e: redis::RedisError| TransportError::Subscribe {
            channel: channel.to_string(),
            reason: e.to_string(),
        };

        let mut pubsub = self.client.get_async_pubsub().await.map_err(subscribe_error)?;
        pubsub.subscribe(channel).await.map_err(subscribe_error)?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let name = channel.to_string();
        let pump = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let envelope = Envelope {
                    channel: msg.get_channel_name().to_string(),
                    payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
                };
                if tx.send(envelope).await.is_err() {
                    break;
                }
            }
            debug!("Subscription pump for {} finished", name);
        });

        self.pumps.lock().await.push(pump);
        debug!("Subscribed to redis channel {}", channel);
        Ok(Subscription::new(channel, rx))
    }

    async fn close(&self) {
        self.publisher.write().await.take();
        let pumps: Vec<_> = self.pumps.lock().await.drain(..).collect();
        if !pumps.is_empty() {
            debug!("Stopping {} subscription pumps", pumps.len());
        }
        for pump in pumps {
            pump.abort();
        }
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        if let Ok(mut pumps) = self.pumps.try_lock() {
            for pump in pumps.drain(..) {
                pump.abort();
            }
        } else {
            warn!("Redis transport dropped while subscriptions were busy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_without_password() {
        let settings = RedisSettings::default();
        assert_eq!(settings.url(), "redis://localhost:6379/");
        assert_eq!(settings.display_addr(), "localhost:6379");
    }

    #[test]
    fn test_url_with_password() {
        let settings = RedisSettings {
            host: "redis.internal".to_string(),
            port: 6380,
            password: Some("secret".to_string()),
        };
        assert_eq!(settings.url(), "redis://:secret@redis.internal:6380/");
        assert!(!settings.display_addr().contains("secret"));
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let transport = RedisTransport::new(RedisSettings::default()).unwrap();
        assert!(matches!(
            transport.publish("A", Bytes::from_static(b"{}")).await,
            Err(TransportError::NotConnected)
        ));
    }
}
