//! Cluster-wide refresh broadcast.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::notify::NotifyError;
use crate::resilience::with_deadline;

/// Payload every publisher sends. Subscribers ignore the content.
pub const REFRESH_PAYLOAD: &str = "refresh";

/// Fire-and-forget channel connecting every gateway instance.
#[async_trait]
pub trait RefreshBus: Send + Sync + 'static {
    async fn publish(&self, payload: &str) -> Result<(), NotifyError>;

    /// One item per received message. The stream ends when the subscription
    /// is lost.
    async fn subscribe(&self) -> Result<BoxStream<'static, ()>, NotifyError>;
}

/// In-process bus. Clones share one channel, so several gateway instances in
/// one process see each other's messages.
#[derive(Debug, Clone)]
pub struct LocalRefreshBus {
    tx: broadcast::Sender<String>,
}

impl LocalRefreshBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl Default for LocalRefreshBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RefreshBus for LocalRefreshBus {
    async fn publish(&self, payload: &str) -> Result<(), NotifyError> {
        // No subscribers is not an error: nobody needs to reload.
        let _ = self.tx.send(payload.to_string());
        Ok(())
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, ()>, NotifyError> {
        let rx = self.tx.subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(_) => Some(((), rx)),
                // Missed messages still mean "something changed".
                Err(broadcast::error::RecvError::Lagged(_)) => Some(((), rx)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(stream.boxed())
    }
}

/// Redis pub/sub channel.
#[derive(Clone)]
pub struct RedisRefreshBus {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
    channel: String,
    timeout: Duration,
}

impl RedisRefreshBus {
    pub async fn connect(url: &str, channel: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = redis::Client::open(url)?;
        let publisher = with_deadline("redis connect", timeout, async {
            Ok::<_, NotifyError>(redis::aio::ConnectionManager::new(client.clone()).await?)
        })
        .await?;
        tracing::info!(channel, "Connected refresh bus to Redis");
        Ok(Self {
            client,
            publisher,
            channel: channel.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl RefreshBus for RedisRefreshBus {
    async fn publish(&self, payload: &str) -> Result<(), NotifyError> {
        let mut conn = self.publisher.clone();
        with_deadline("refresh publish", self.timeout, async {
            let receivers: i64 = redis::cmd("PUBLISH")
                .arg(&self.channel)
                .arg(payload)
                .query_async(&mut conn)
                .await?;
            tracing::debug!(channel = %self.channel, receivers, "Refresh published");
            Ok::<_, NotifyError>(())
        })
        .await
    }

    async fn subscribe(&self) -> Result<BoxStream<'static, ()>, NotifyError> {
        let pubsub = with_deadline("refresh subscribe", self.timeout, async {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(self.channel.as_str()).await?;
            Ok::<_, NotifyError>(pubsub)
        })
        .await?;
        tracing::info!(channel = %self.channel, "Subscribed to refresh channel");
        Ok(pubsub.into_on_message().map(|_| ()).boxed())
    }
}
