//! In-process pub/sub backend on a tokio broadcast bus.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{ChannelError, StatusChannel, StatusMessage, Subscription};

/// All named channels share one broadcast bus; subscriptions filter by name.
///
/// A subscriber that falls more than `capacity` messages behind loses the
/// oldest ones, which keeps the at-most-once delivery of a real broker.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    tx: broadcast::Sender<StatusMessage>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusChannel for MemoryChannel {
    async fn post(&self, channel: &str, text: &str) -> Result<(), ChannelError> {
        if self.tx.send(StatusMessage::new(channel, text)).is_err() {
            tracing::trace!("no subscribers on {channel}, dropped {text:?}");
        }
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, ChannelError> {
        Ok(Box::new(MemorySubscription {
            rx: self.tx.subscribe(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<StatusMessage>,
    channels: Vec<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self, wait: Duration) -> Result<Option<StatusMessage>, ChannelError> {
        let deadline = Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Ok(message)) => {
                    if self.channels.iter().any(|c| *c == message.channel) {
                        return Ok(Some(message));
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!("status subscriber lagged, {skipped} messages lost");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return Err(ChannelError::Closed),
                Err(_) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BROADCAST_CHANNEL, STATUS_CHANNEL};

    #[tokio::test]
    async fn subscriber_receives_messages_on_its_channels() {
        let bus = MemoryChannel::new();
        let mut sub = bus.subscribe(&[STATUS_CHANNEL]).await.unwrap();

        bus.post("other", "ignored").await.unwrap();
        bus.post(STATUS_CHANNEL, "home-a updated at t = 0.").await.unwrap();

        let msg = sub.next_message(Duration::from_millis(50)).await.unwrap();
        assert_eq!(
            msg,
            Some(StatusMessage::new(STATUS_CHANNEL, "home-a updated at t = 0."))
        );
    }

    #[tokio::test]
    async fn empty_wait_returns_none() {
        let bus = MemoryChannel::new();
        let mut sub = bus
            .subscribe(&[STATUS_CHANNEL, BROADCAST_CHANNEL])
            .await
            .unwrap();
        let msg = sub.next_message(Duration::from_millis(10)).await.unwrap();
        assert_eq!(msg, None);
    }

    #[tokio::test]
    async fn messages_before_subscribing_are_not_seen() {
        let bus = MemoryChannel::new();
        bus.post(STATUS_CHANNEL, "forward").await.unwrap();
        let mut sub = bus.subscribe(&[STATUS_CHANNEL]).await.unwrap();
        let msg = sub.next_message(Duration::from_millis(10)).await.unwrap();
        assert_eq!(msg, None);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_lost_messages() {
        let bus = MemoryChannel::with_capacity(2);
        let mut sub = bus.subscribe(&[STATUS_CHANNEL]).await.unwrap();
        for i in 0..5 {
            bus.post(STATUS_CHANNEL, &format!("m{i}")).await.unwrap();
        }
        let msg = sub.next_message(Duration::from_millis(10)).await.unwrap();
        assert_eq!(msg.map(|m| m.text), Some("m3".to_string()));
    }
}
