//! Control-plane client.
//!
//! Publishes lifecycle status for this worker and delivers commands sent to
//! it. Status publishing is best-effort telemetry: failures are logged and
//! swallowed, never propagated.

pub mod messages;
pub mod redis_transport;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BotSession;
use crate::error::BotResult;

pub use messages::{Channels, Command, LifecycleStatus, StatusUpdate};
pub use redis_transport::RedisTransport;

/// Message-broker seam: publish to a channel, subscribe to a channel.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> BotResult<()>;

    /// Open a subscription; every message payload is forwarded to the
    /// returned receiver until the transport is closed.
    async fn subscribe(&self, channel: &str) -> BotResult<mpsc::Receiver<String>>;

    async fn close(&self);
}

pub struct ControlPlane {
    transport: Arc<dyn ControlTransport>,
    channels: Channels,
    container_id: String,
    meeting_id: i64,
    listener: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ControlPlane {
    /// Connect to the Redis broker. An unreachable broker is fatal.
    pub async fn connect(
        redis_url: &str,
        session: &BotSession,
        channel_prefix: Option<&str>,
    ) -> BotResult<Self> {
        let transport = RedisTransport::connect(redis_url).await?;
        Ok(Self::new(Arc::new(transport), session, channel_prefix))
    }

    pub fn new(
        transport: Arc<dyn ControlTransport>,
        session: &BotSession,
        channel_prefix: Option<&str>,
    ) -> Self {
        Self {
            transport,
            channels: Channels::for_container(&session.container_id, channel_prefix),
            container_id: session.container_id.clone(),
            meeting_id: session.meeting_id,
            listener: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Fire-and-forget publish of one status update.
    pub async fn publish_status(
        &self,
        status: LifecycleStatus,
        chunk_count: Option<u64>,
        error_message: Option<String>,
    ) {
        let update = StatusUpdate::new(
            &self.container_id,
            self.meeting_id,
            status,
            chunk_count,
            error_message,
        );

        let payload = match serde_json::to_string(&update) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize status update: {}", e);
                return;
            }
        };

        match self.transport.publish(&self.channels.status, payload).await {
            Ok(()) => match chunk_count {
                Some(count) => info!("Published status: {} ({} chunks)", status, count),
                None => info!("Published status: {}", status),
            },
            Err(e) => warn!("Failed to publish status {}: {}", status, e),
        }
    }

    /// Subscribe to this worker's command channel. `handler` runs once per
    /// received command on a background task.
    pub async fn subscribe_commands<F>(&self, handler: F) -> BotResult<()>
    where
        F: Fn(Command) + Send + Sync + 'static,
    {
        let mut rx = self.transport.subscribe(&self.channels.command).await?;
        let channel = self.channels.command.clone();

        let handle = tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                match Command::parse(&payload) {
                    Ok(command) => {
                        info!("Received command: {:?}", command);
                        handler(command);
                    }
                    Err(e) => warn!("Ignoring malformed command on {}: {}", channel, e),
                }
            }
            debug!("Command listener for {} stopped", channel);
        });

        if let Ok(mut slot) = self.listener.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Close both connections. Safe to call more than once.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.listener.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        self.transport.close().await;
        info!("Disconnected from control plane");
    }
}
