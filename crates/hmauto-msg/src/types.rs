//! ---
//! hma_section: "02-messaging-ipc-data-model"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Topic bus and message envelope."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type for raw state values.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
/// Content type for structured payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Envelope carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique identifier for deduplication and tracing.
    pub id: Uuid,
    /// Dotted topic, e.g. `hmstt_channel.hmstt.switch.server_1`.
    pub routing_key: String,
    /// MIME type of `body`.
    pub content_type: String,
    /// Payload as published.
    pub body: String,
    /// Timestamp when the message was handed to the bus.
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    /// Plain-text message, as used for state values.
    pub fn text(routing_key: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_content_type(routing_key, CONTENT_TYPE_TEXT, body)
    }

    /// JSON encoded message.
    pub fn json<T: Serialize>(routing_key: impl Into<String>, payload: &T) -> crate::Result<Self> {
        let body = serde_json::to_string(payload)?;
        Ok(Self::with_content_type(routing_key, CONTENT_TYPE_JSON, body))
    }

    fn with_content_type(
        routing_key: impl Into<String>,
        content_type: &str,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            routing_key: routing_key.into(),
            content_type: content_type.to_owned(),
            body: body.into(),
            published_at: Utc::now(),
        }
    }

    /// Decode a JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    #[test]
    fn json_messages_decode_back() {
        let message = BusMessage::json("a.b", &Ping { seq: 7 }).unwrap();
        assert_eq!(message.content_type, CONTENT_TYPE_JSON);
        assert_eq!(message.decode::<Ping>().unwrap(), Ping { seq: 7 });
    }

    #[test]
    fn text_messages_keep_body_verbatim() {
        let message = BusMessage::text("a.b", "on");
        assert_eq!(message.body, "on");
        assert_eq!(message.content_type, CONTENT_TYPE_TEXT);
        assert!(message.decode::<Ping>().is_err());
    }
}
