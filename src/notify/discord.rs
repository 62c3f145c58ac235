//! Discord webhook delivery

use std::time::Duration;

use async_trait::async_trait;

use super::embed::Embed;
use super::sink::{Channel, ChatPlatform, NotifyError};

/// Posts notifications to one Discord webhook per channel
pub struct DiscordWebhook {
    client: reqwest::Client,
    mod_log_url: Option<String>,
    match_log_url: Option<String>,
}

impl DiscordWebhook {
    pub fn new(
        mod_log_url: Option<String>,
        match_log_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gamewarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Platform(e.to_string()))?;

        Ok(Self {
            client,
            mod_log_url,
            match_log_url,
        })
    }

    fn url_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::ModLog => self.mod_log_url.as_deref(),
            Channel::MatchLog => self.match_log_url.as_deref(),
        }
    }
}

/// Webhook body carrying one embed
pub fn format_payload(embed: &Embed) -> serde_json::Value {
    serde_json::json!({ "embeds": [format_embed(embed)] })
}

fn format_embed(embed: &Embed) -> serde_json::Value {
    let fields: Vec<_> = embed
        .fields
        .iter()
        .map(|f| {
            serde_json::json!({
                "name": f.name,
                "value": f.value,
                "inline": f.inline
            })
        })
        .collect();

    let mut value = serde_json::json!({
        "title": embed.title,
        "color": embed.color,
        "fields": fields,
    });

    if let Some(ref description) = embed.description {
        value["description"] = serde_json::json!(description);
    }
    if let Some(ref url) = embed.url {
        value["url"] = serde_json::json!(url);
    }
    if let Some(ts) = embed.timestamp {
        value["timestamp"] = serde_json::json!(ts.to_rfc3339());
    }

    value
}

#[async_trait]
impl ChatPlatform for DiscordWebhook {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, channel: Channel, embed: &Embed) -> Result<(), NotifyError> {
        let Some(url) = self.url_for(channel) else {
            tracing::debug!(channel = channel.as_str(), "No webhook configured for channel, skipping");
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&format_payload(embed))
            .send()
            .await
            .map_err(|e| NotifyError::Platform(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Platform(format!("webhook returned {}", status)));
        }

        tracing::debug!(channel = channel.as_str(), "Notification delivered to discord");
        Ok(())
    }
}
