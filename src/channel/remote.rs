//! Redis pub/sub backend for multi-process runs.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;

use super::{ChannelError, StatusChannel, StatusMessage, Subscription};

/// Publishes over a shared multiplexed connection; each subscription gets
/// its own dedicated pub/sub connection.
pub struct RedisChannel {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
}

impl RedisChannel {
    /// Connects to the server at `url` (e.g. `redis://localhost`).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Backend`] if the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)?;
        Ok(Self { client, conn })
    }
}

fn backend(e: redis::RedisError) -> ChannelError {
    ChannelError::Backend(e.to_string())
}

#[async_trait]
impl StatusChannel for RedisChannel {
    async fn post(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, text)
            .await
            .map_err(backend)
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, ChannelError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(backend)?;
        for channel in channels {
            pubsub.subscribe(*channel).await.map_err(backend)?;
        }
        Ok(Box::new(RedisSubscription { pubsub }))
    }
}

struct RedisSubscription {
    pubsub: redis::aio::PubSub,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self, wait: Duration) -> Result<Option<StatusMessage>, ChannelError> {
        let mut messages = self.pubsub.on_message();
        match tokio::time::timeout(wait, messages.next()).await {
            Ok(Some(msg)) => {
                let text: String = msg.get_payload().map_err(backend)?;
                Ok(Some(StatusMessage::new(msg.get_channel_name(), text)))
            }
            Ok(None) => Err(ChannelError::Closed),
            Err(_) => Ok(None),
        }
    }
}
