//! ---
//! hma_section: "05-networking-external-interfaces"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Operator alert publishing and delivery."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::dispatcher::AlertSink;
use crate::level::embed_color;
use crate::service::AlertEvent;
use crate::{AlertError, Result};

/// Embed title used for every alert.
pub const EMBED_TITLE: &str = "Hmalert Notification";

/// Body posted to a Discord webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordWebhookPayload {
    /// Override for the webhook's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Plain message content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Rich embeds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<DiscordEmbed>,
}

/// One embed block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordEmbed {
    /// Heading.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Free text under the heading.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// RGB colour of the side bar.
    #[serde(default)]
    pub color: u32,
    /// Name/value rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<DiscordEmbedField>,
}

/// One name/value row inside an embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordEmbedField {
    /// Row label.
    pub name: String,
    /// Row content.
    pub value: String,
    /// Render next to the previous inline field.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

impl DiscordEmbedField {
    fn new(name: &str, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.to_owned(),
            value: value.into(),
            inline,
        }
    }
}

impl DiscordWebhookPayload {
    /// Render an alert as a single embed with Type, Level, Time and Message rows.
    pub fn from_event(event: &AlertEvent) -> Self {
        let time = Utc
            .timestamp_opt(event.timestamp, 0)
            .single()
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| event.timestamp.to_string());
        let embed = DiscordEmbed {
            title: EMBED_TITLE.to_owned(),
            description: String::new(),
            color: embed_color(&event.level),
            fields: vec![
                DiscordEmbedField::new("Type", event.kind.clone(), true),
                DiscordEmbedField::new("Level", event.level.clone(), true),
                DiscordEmbedField::new("Time", time, false),
                DiscordEmbedField::new("Message", event.message.clone(), false),
            ],
        };
        Self {
            embeds: vec![embed],
            ..Self::default()
        }
    }
}

/// Posts payloads to one webhook URL.
#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    url: String,
    client: reqwest::Client,
}

impl DiscordWebhook {
    /// Build a webhook client with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the payload as JSON. Non-2xx answers are errors.
    pub async fn send(&self, payload: &DiscordWebhookPayload) -> Result<()> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "discord webhook rejected payload");
            return Err(AlertError::Rejected(status.as_u16()));
        }
        debug!(status = status.as_u16(), "discord webhook accepted payload");
        Ok(())
    }
}

#[async_trait]
impl AlertSink for DiscordWebhook {
    async fn deliver(&self, event: &AlertEvent) -> Result<()> {
        self.send(&DiscordWebhookPayload::from_event(event)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_matches_discord_embed_shape() {
        let event = AlertEvent {
            kind: "Internet Check".into(),
            level: "info".into(),
            message: "Internet connection is up ✅".into(),
            timestamp: 0,
        };
        let json = serde_json::to_value(DiscordWebhookPayload::from_event(&event)).unwrap();
        let embed = &json["embeds"][0];
        assert_eq!(embed["title"], EMBED_TITLE);
        assert_eq!(embed["color"], 0x00FF00);
        assert_eq!(embed["fields"][0]["name"], "Type");
        assert_eq!(embed["fields"][0]["inline"], true);
        assert_eq!(embed["fields"][2]["value"], "1970-01-01 00:00:00");
        assert!(embed["fields"][3].get("inline").is_none());
        assert!(json.get("username").is_none());
    }
}
