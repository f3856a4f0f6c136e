//! ---
//! hma_section: "02-messaging-ipc-data-model"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Topic bus and message envelope."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! In-process topic bus used to announce state changes and queue alerts.

pub mod bus;
pub mod types;

use std::time::Duration;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Failures surfaced by publishers.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The bus has been shut down and accepts no further messages.
    #[error("bus is closed")]
    Closed,
    /// The publisher did not acknowledge within the configured window.
    #[error("publish to '{routing_key}' timed out after {timeout:?}")]
    Timeout {
        /// Routing key of the message that timed out.
        routing_key: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The routing key is not a valid dotted topic.
    #[error("invalid routing key '{0}'")]
    InvalidRoutingKey(String),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use bus::{topic_matches, ChangePublisher, Subscription, TimeoutPublisher, TopicBus};
pub use types::BusMessage;
