//! Polling barrier over a status subscription.
//!
//! A wait returns once a received message matches the awaited status. Empty
//! polls back off exponentially; an optional deadline turns a missing
//! publisher into [`BarrierError::Timeout`] instead of a hang.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{ChannelError, MatchMode, StatusChannel, StatusKind, StatusMessage, Subscription};

/// Errors returned by [`Barrier::await_status`].
#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("timed out after {waited:?} waiting for status \"{awaited}\"")]
    Timeout {
        awaited: StatusKind,
        waited: Duration,
    },

    #[error("wait for status \"{awaited}\" was cancelled")]
    Cancelled { awaited: StatusKind },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Barrier wait tuning.
#[derive(Debug, Clone)]
pub struct BarrierConfig {
    /// First receive wait, and the wait after any received message.
    pub poll_initial: Duration,
    /// Upper bound for the doubled receive wait.
    pub poll_max: Duration,
    /// Total time a single wait may take. `None` waits forever.
    pub deadline: Option<Duration>,
    pub match_mode: MatchMode,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            poll_initial: Duration::from_millis(100),
            poll_max: Duration::from_secs(1),
            deadline: None,
            match_mode: MatchMode::Exact,
        }
    }
}

/// Aborts barrier waits from outside the waiting task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A long-lived subscription plus the wait policy applied to it.
pub struct Barrier {
    subscription: Box<dyn Subscription>,
    config: BarrierConfig,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl Barrier {
    /// Subscribes to `channels` and keeps the subscription for every later
    /// wait, so statuses published between waits are buffered.
    pub async fn open(
        channel: &dyn StatusChannel,
        channels: &[&str],
        config: BarrierConfig,
    ) -> Result<Self, ChannelError> {
        let subscription = channel.subscribe(channels).await?;
        Ok(Self::new(subscription, config))
    }

    pub fn new(subscription: Box<dyn Subscription>, config: BarrierConfig) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            subscription,
            config,
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn config(&self) -> &BarrierConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Blocks until a message matching `awaited` arrives.
    ///
    /// Non-matching messages are logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Timeout`] once the configured deadline elapses
    /// - [`BarrierError::Cancelled`] if the cancel handle fires
    /// - [`BarrierError::Channel`] if the subscription fails
    pub async fn await_status(&mut self, awaited: StatusKind) -> Result<StatusMessage, BarrierError> {
        let started = Instant::now();
        let mut poll = self.config.poll_initial;

        loop {
            let mut wait = poll;
            if let Some(deadline) = self.config.deadline {
                let waited = started.elapsed();
                if waited >= deadline {
                    return Err(BarrierError::Timeout { awaited, waited });
                }
                wait = wait.min(deadline - waited);
            }

            let received = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel_rx) => {
                    return Err(BarrierError::Cancelled { awaited });
                }
                r = self.subscription.next_message(wait) => r?,
            };

            match received {
                Some(message) => {
                    tracing::debug!(channel = %message.channel, "received {:?}", message.text);
                    if self.config.match_mode.matches(&message, awaited) {
                        return Ok(message);
                    }
                    poll = self.config.poll_initial;
                }
                None => {
                    tracing::trace!("no status within {wait:?}, still waiting for \"{awaited}\"");
                    poll = (poll * 2).min(self.config.poll_max);
                }
            }
        }
    }
}

/// Resolves once the cancel flag is set.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemoryChannel, STATUS_CHANNEL};

    fn fast(deadline: Option<Duration>) -> BarrierConfig {
        BarrierConfig {
            poll_initial: Duration::from_millis(5),
            poll_max: Duration::from_millis(20),
            deadline,
            match_mode: MatchMode::Exact,
        }
    }

    #[tokio::test]
    async fn returns_on_matching_status() {
        let bus = MemoryChannel::new();
        let mut barrier = Barrier::open(&bus, &[STATUS_CHANNEL], fast(None))
            .await
            .unwrap();

        bus.post(STATUS_CHANNEL, "home-b updated at t = 0.").await.unwrap();
        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        bus.post(STATUS_CHANNEL, "forward").await.unwrap();

        let msg = barrier.await_status(StatusKind::Forward).await.unwrap();
        assert_eq!(msg.text, "forward");
    }

    #[tokio::test]
    async fn non_matching_messages_never_release() {
        let bus = MemoryChannel::new();
        let mut barrier = Barrier::open(
            &bus,
            &[STATUS_CHANNEL],
            fast(Some(Duration::from_millis(60))),
        )
        .await
        .unwrap();

        bus.post(STATUS_CHANNEL, "ready").await.unwrap();
        bus.post(STATUS_CHANNEL, "home-a updated at t = 0.").await.unwrap();

        let err = barrier.await_status(StatusKind::AllReady).await.unwrap_err();
        assert!(matches!(
            err,
            BarrierError::Timeout {
                awaited: StatusKind::AllReady,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn late_publisher_releases_waiter() {
        let bus = MemoryChannel::new();
        let mut barrier = Barrier::open(&bus, &[STATUS_CHANNEL], fast(None))
            .await
            .unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            publisher.post(STATUS_CHANNEL, "all ready").await.ok();
        });

        let msg = barrier.await_status(StatusKind::AllReady).await.unwrap();
        assert_eq!(msg.status().map(|s| s.kind), Some(StatusKind::AllReady));
    }

    #[tokio::test]
    async fn cancel_aborts_unbounded_wait() {
        let bus = MemoryChannel::new();
        let mut barrier = Barrier::open(&bus, &[STATUS_CHANNEL], fast(None))
            .await
            .unwrap();
        let handle = barrier.cancel_handle();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        });

        let err = barrier.await_status(StatusKind::Forward).await.unwrap_err();
        assert!(matches!(err, BarrierError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn substring_mode_accepts_legacy_payloads() {
        let bus = MemoryChannel::new();
        let config = BarrierConfig {
            match_mode: MatchMode::Substring,
            ..fast(Some(Duration::from_millis(100)))
        };
        let mut barrier = Barrier::open(&bus, &[STATUS_CHANNEL], config)
            .await
            .unwrap();

        bus.post(STATUS_CHANNEL, "aggregator says: go forward now").await.unwrap();
        let msg = barrier.await_status(StatusKind::Forward).await.unwrap();
        assert!(msg.text.contains("forward"));
    }
}
