//! Outbound notifications to the community chat platform

pub mod discord;
pub mod embed;
pub mod sink;

pub use discord::DiscordWebhook;
pub use embed::{Color, Embed};
pub use sink::{
    run_notifier, Channel, ChatPlatform, LogPlatform, Notification, NotificationSink,
    NotifyError,
};

#[cfg(test)]
pub mod testing {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{Channel, ChatPlatform, Embed, NotifyError};

    /// Records every message handed to the platform
    #[derive(Default)]
    pub struct RecordingPlatform {
        sent: Mutex<Vec<(Channel, Embed)>>,
        attempts: Mutex<usize>,
        fail: bool,
    }

    impl RecordingPlatform {
        pub fn failing() -> Self {
            Self { fail: true, ..Default::default() }
        }

        pub fn sent(&self) -> Vec<(Channel, Embed)> {
            self.sent.lock().clone()
        }

        pub fn attempts(&self) -> usize {
            *self.attempts.lock()
        }
    }

    #[async_trait]
    impl ChatPlatform for RecordingPlatform {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, channel: Channel, embed: &Embed) -> Result<(), NotifyError> {
            *self.attempts.lock() += 1;
            if self.fail {
                return Err(NotifyError::Platform("unavailable".into()));
            }
            self.sent.lock().push((channel, embed.clone()));
            Ok(())
        }
    }
}
