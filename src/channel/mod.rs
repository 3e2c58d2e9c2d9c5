//! Status messaging between players and the aggregator.
//!
//! Statuses travel as short text payloads on named pub/sub channels:
//! `"<home-name> <status-word> at t = <nstep>."`. Delivery is at-most-once,
//! so every barrier wait is built on a subscription opened before the
//! matching status can be published.

pub mod barrier;
mod memory;
#[cfg(feature = "redis")]
mod remote;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

pub use barrier::{Barrier, BarrierConfig, BarrierError, CancelHandle};
pub use memory::MemoryChannel;
#[cfg(feature = "redis")]
pub use remote::RedisChannel;

/// Channel carrying player statuses and aggregator broadcasts.
pub const STATUS_CHANNEL: &str = "channel:1";
/// Channel reserved for aggregator-only broadcasts.
pub const BROADCAST_CHANNEL: &str = "channel:2";

/// Errors surfaced by channel backends.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("status channel closed")]
    Closed,

    #[error("status channel backend error: {0}")]
    Backend(String),
}

/// Protocol phases announced on the status channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Aggregator: players may connect and load their homes.
    Ready,
    /// Player: home loaded and initial solve done.
    Initialized,
    /// Aggregator: every player initialized.
    AllReady,
    /// Player: step results written to the store.
    Updated,
    /// Aggregator: every player updated, advance to the next step.
    Forward,
    /// Player: horizon finished.
    Done,
}

impl StatusKind {
    /// Parse order; a word that ends with another word comes first.
    const PARSE_ORDER: [StatusKind; 6] = [
        StatusKind::AllReady,
        StatusKind::Ready,
        StatusKind::Initialized,
        StatusKind::Updated,
        StatusKind::Forward,
        StatusKind::Done,
    ];

    /// Wire word for this status.
    pub fn word(self) -> &'static str {
        match self {
            StatusKind::Ready => "ready",
            StatusKind::Initialized => "initialized player",
            StatusKind::AllReady => "all ready",
            StatusKind::Updated => "updated",
            StatusKind::Forward => "forward",
            StatusKind::Done => "done",
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.word())
    }
}

/// Structured view of a status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    /// Sender's home name; aggregator broadcasts usually carry none.
    pub home: Option<String>,
    pub step: Option<u64>,
}

impl Status {
    /// Parses a payload. The status word must be the whole head of the
    /// message or its last space-separated token(s).
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim().trim_end_matches('.');
        let (head, step) = match text.split_once(" at t = ") {
            Some((head, tail)) => (head.trim(), tail.trim().parse::<u64>().ok()),
            None => (text, None),
        };

        StatusKind::PARSE_ORDER.iter().find_map(|&kind| {
            let word = kind.word();
            if head == word {
                return Some(Status {
                    kind,
                    home: None,
                    step,
                });
            }
            let home = head.strip_suffix(word)?.strip_suffix(' ')?;
            Some(Status {
                kind,
                home: Some(home.to_string()),
                step,
            })
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(home) = &self.home {
            write!(f, "{home} ")?;
        }
        write!(f, "{}", self.kind)?;
        if let Some(step) = self.step {
            write!(f, " at t = {step}.")?;
        }
        Ok(())
    }
}

/// Raw message as received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub channel: String,
    pub text: String,
}

impl StatusMessage {
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
        }
    }

    pub fn status(&self) -> Option<Status> {
        Status::parse(&self.text)
    }
}

/// How a received payload is tested against an awaited status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Parsed status kind must equal the awaited kind.
    #[default]
    Exact,
    /// Raw payload must contain the awaited word. "ready" matches "all ready".
    Substring,
}

impl MatchMode {
    pub fn matches(self, message: &StatusMessage, awaited: StatusKind) -> bool {
        match self {
            MatchMode::Exact => message.status().is_some_and(|s| s.kind == awaited),
            MatchMode::Substring => message.text.contains(awaited.word()),
        }
    }
}

/// Publish side of the status channels.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    /// Fire-and-forget publish. Succeeds even if nobody is listening.
    async fn post(&self, channel: &str, text: &str) -> Result<(), ChannelError>;

    /// Opens a subscription to a set of channels. Messages published after
    /// this returns are buffered until read.
    async fn subscribe(&self, channels: &[&str]) -> Result<Box<dyn Subscription>, ChannelError>;
}

/// Receive side of a channel subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Waits up to `wait` for the next message. `Ok(None)` means the wait
    /// elapsed with nothing received.
    async fn next_message(&mut self, wait: Duration) -> Result<Option<StatusMessage>, ChannelError>;
}
