//! ---
//! hma_section: "05-networking-external-interfaces"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Operator alert publishing and delivery."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Leveled alerts: producers publish onto the bus, a dispatcher delivers them
//! to the Discord webhook registered for each level.

pub mod discord;
pub mod dispatcher;
pub mod level;
pub mod service;

use async_trait::async_trait;

/// Result alias used by alert producers and sinks.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors raised while publishing or delivering alerts.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// Level string is not one of `info`, `warning` or `error`.
    #[error("unknown alert level '{0}'")]
    UnknownLevel(String),
    /// The bus refused the alert event.
    #[error("failed to publish alert: {0}")]
    Bus(#[from] hmauto_msg::BusError),
    /// Transport level failure talking to the webhook.
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The webhook answered with a non-success status.
    #[error("webhook rejected alert with status {0}")]
    Rejected(u16),
    /// No delivery target is configured for the level.
    #[error("no sink configured for level {0}")]
    NoSink(level::AlertLevel),
}

/// Delivers leveled, human-readable alerts to an operator channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Emit one alert. Callers log failures and carry on.
    async fn notify(&self, level: level::AlertLevel, category: &str, message: &str) -> Result<()>;
}

pub use discord::{DiscordEmbed, DiscordEmbedField, DiscordWebhook, DiscordWebhookPayload};
pub use dispatcher::{AlertDispatcher, AlertSink, AlertSinks};
pub use level::AlertLevel;
pub use service::{AlertEvent, AlertRequest, AlertService, BatchReport};
