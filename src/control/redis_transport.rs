//! Redis pub/sub transport.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::ControlTransport;
use crate::error::{BotError, BotResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Two connections: a multiplexed one for publishing and a dedicated
/// pub/sub connection opened on the first subscription.
pub struct RedisTransport {
    client: redis::Client,
    publisher: Mutex<Option<MultiplexedConnection>>,
    subscriber: Mutex<Option<JoinHandle<()>>>,
}

impl RedisTransport {
    pub async fn connect(redis_url: &str) -> BotResult<Self> {
        let client = redis::Client::open(redis_url).map_err(BotError::control_plane)?;
        let connection = timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| BotError::ControlPlane(format!("timed out connecting to {redis_url}")))?
            .map_err(BotError::control_plane)?;

        info!("Connected to control plane at {}", redis_url);

        Ok(Self {
            client,
            publisher: Mutex::new(Some(connection)),
            subscriber: Mutex::new(None),
        })
    }

    fn publisher(&self) -> BotResult<MultiplexedConnection> {
        self.publisher
            .lock()
            .map_err(|_| BotError::ControlPlane("publisher lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| BotError::ControlPlane("disconnected".to_string()))
    }
}

#[async_trait]
impl ControlTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> BotResult<()> {
        let mut conn = self.publisher()?;
        let receivers: i64 = timeout(PUBLISH_TIMEOUT, conn.publish(channel, payload))
            .await
            .map_err(|_| BotError::ControlPlane(format!("publish to {channel} timed out")))?
            .map_err(BotError::control_plane)?;
        debug!("Published to {} ({} receivers)", channel, receivers);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> BotResult<mpsc::Receiver<String>> {
        let mut pubsub = timeout(CONNECT_TIMEOUT, self.client.get_async_pubsub())
            .await
            .map_err(|_| BotError::ControlPlane("timed out opening subscriber".to_string()))?
            .map_err(BotError::control_plane)?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(BotError::control_plane)?;

        let (tx, rx) = mpsc::channel(16);
        let channel_name = channel.to_string();
        let handle = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping non-text message on {}: {}", channel_name, e),
                }
            }
            debug!("Subscription to {} ended", channel_name);
        });

        if let Ok(mut slot) = self.subscriber.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }

        info!("Subscribed to {}", channel);
        Ok(rx)
    }

    async fn close(&self) {
        if let Ok(mut slot) = self.subscriber.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        if let Ok(mut publisher) = self.publisher.lock() {
            publisher.take();
        }
    }
}
