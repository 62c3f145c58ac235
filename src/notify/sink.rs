//! Notification sink - bounded fan-in queue drained by one task

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::embed::Embed;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification queue full")]
    QueueFull,

    #[error("notification queue closed")]
    Closed,

    #[error("chat platform error: {0}")]
    Platform(String),
}

/// Destination channel on the chat platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Warnings and automatic moderation actions
    ModLog,
    /// Match summaries
    MatchLog,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ModLog => "mod_log",
            Channel::MatchLog => "match_log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: Channel,
    pub embed: Embed,
}

impl Notification {
    pub fn embed(channel: Channel, embed: Embed) -> Self {
        Self { channel, embed }
    }
}

/// Outbound chat platform boundary
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, channel: Channel, embed: &Embed) -> Result<(), NotifyError>;
}

/// Platform used when no webhook is configured: notifications only reach the log
pub struct LogPlatform;

#[async_trait]
impl ChatPlatform for LogPlatform {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, channel: Channel, embed: &Embed) -> Result<(), NotifyError> {
        tracing::info!(
            channel = channel.as_str(),
            fields = embed.fields.len(),
            "{}",
            embed.title
        );
        Ok(())
    }
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a notification; fails immediately when the queue is full
    pub fn enqueue(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::QueueFull,
            TrySendError::Closed(_) => NotifyError::Closed,
        })
    }

    /// Queue and log on failure. Notifications are best-effort.
    pub fn offer(&self, notification: Notification) {
        let channel = notification.channel;
        if let Err(e) = self.enqueue(notification) {
            tracing::error!(channel = channel.as_str(), error = %e, "Failed to queue notification, discarding");
        }
    }
}

/// Drain loop: forwards queued notifications one at a time
pub async fn run_notifier(
    mut rx: mpsc::Receiver<Notification>,
    platform: Arc<dyn ChatPlatform>,
    cancel: CancellationToken,
) {
    tracing::info!(platform = platform.name(), "Notification sender started");

    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(n) => n,
                None => break,
            },
        };

        if let Err(e) = platform.send(notification.channel, &notification.embed).await {
            tracing::error!(
                platform = platform.name(),
                channel = notification.channel.as_str(),
                error = %e,
                "Failed to send notification"
            );
        }
    }

    tracing::debug!("Notification sender stopped");
}
