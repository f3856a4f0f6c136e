//! ---
//! hma_section: "05-networking-external-interfaces"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Operator alert publishing and delivery."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use hmauto_msg::{BusMessage, ChangePublisher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::level::AlertLevel;
use crate::{AlertError, Notifier, Result};

/// Alert as carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Category shown to operators, e.g. `Internet Check`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw level name.
    pub level: String,
    /// Human-readable text.
    pub message: String,
    /// Unix seconds at publish time.
    pub timestamp: i64,
}

impl AlertEvent {
    /// Stamp a new event with the current time.
    pub fn new(level: AlertLevel, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            level: level.as_str().to_owned(),
            message: message.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Inbound publish request as accepted over HTTP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRequest {
    /// Level name; validated on publish.
    #[serde(default)]
    pub level: String,
    /// Alert text.
    #[serde(default)]
    pub message: String,
    /// Alert category.
    #[serde(default)]
    pub tipe: String,
}

/// Result of a batch publish. Every request has been attempted when this is returned.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Number of alerts handed to the bus.
    pub accepted: usize,
    /// Index into the request batch and the failure for that entry.
    pub failures: Vec<(usize, AlertError)>,
}

impl BatchReport {
    /// True when every alert in the batch was accepted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Publishes alerts onto `<alert_channel>.<level>` for the dispatcher to deliver.
#[derive(Clone)]
pub struct AlertService {
    publisher: Arc<dyn ChangePublisher>,
    channel: String,
}

impl std::fmt::Debug for AlertService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertService")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl AlertService {
    /// Create a service publishing under `channel`.
    pub fn new(publisher: Arc<dyn ChangePublisher>, channel: impl Into<String>) -> Self {
        Self {
            publisher,
            channel: channel.into(),
        }
    }

    /// Routing key for alerts of `level`.
    pub fn routing_key(&self, level: AlertLevel) -> String {
        format!("{}.{}", self.channel, level.as_str())
    }

    /// Validate and publish a single request.
    pub async fn publish(&self, request: &AlertRequest) -> Result<()> {
        let level: AlertLevel = request.level.parse()?;
        self.publish_event(level, AlertEvent::new(level, &request.tipe, &request.message))
            .await
    }

    /// Publish every request concurrently and wait for all of them.
    pub async fn publish_batch(&self, requests: &[AlertRequest]) -> BatchReport {
        let results = join_all(requests.iter().map(|request| self.publish(request))).await;
        let mut report = BatchReport::default();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(()) => report.accepted += 1,
                Err(err) => {
                    warn!(index, error = %err, "alert in batch was not published");
                    report.failures.push((index, err));
                }
            }
        }
        debug!(
            accepted = report.accepted,
            failed = report.failures.len(),
            "alert batch processed"
        );
        report
    }

    async fn publish_event(&self, level: AlertLevel, event: AlertEvent) -> Result<()> {
        info!(
            level = %level,
            category = %event.kind,
            message = %event.message,
            "publishing alert"
        );
        let message = BusMessage::json(self.routing_key(level), &event)?;
        self.publisher.publish_message(message).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for AlertService {
    async fn notify(&self, level: AlertLevel, category: &str, message: &str) -> Result<()> {
        self.publish_event(level, AlertEvent::new(level, category, message))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmauto_msg::TopicBus;

    fn service(bus: &TopicBus) -> AlertService {
        AlertService::new(Arc::new(bus.clone()), "hmalert_channel")
    }

    #[tokio::test]
    async fn notify_publishes_json_event_on_level_topic() {
        let bus = TopicBus::new(8);
        let mut warnings = bus.subscribe("hmalert_channel.warning");
        service(&bus)
            .notify(AlertLevel::Warning, "Internet Check", "modem down")
            .await
            .unwrap();

        let message = warnings.recv().await.unwrap();
        let event: AlertEvent = message.decode().unwrap();
        assert_eq!(event.kind, "Internet Check");
        assert_eq!(event.level, "warning");
        assert_eq!(event.message, "modem down");
    }

    #[tokio::test]
    async fn unknown_level_is_rejected_before_publishing() {
        let bus = TopicBus::new(8);
        let request = AlertRequest {
            level: "loud".into(),
            message: "x".into(),
            tipe: "t".into(),
        };
        let result = service(&bus).publish(&request).await;
        assert!(matches!(result, Err(AlertError::UnknownLevel(_))));
        assert_eq!(bus.published(), 0);
    }

    #[tokio::test]
    async fn batch_reports_each_failure_after_all_complete() {
        let bus = TopicBus::new(8);
        let requests = vec![
            AlertRequest {
                level: "info".into(),
                message: "a".into(),
                tipe: "t".into(),
            },
            AlertRequest {
                level: "nope".into(),
                message: "b".into(),
                tipe: "t".into(),
            },
            AlertRequest {
                level: "error".into(),
                message: "c".into(),
                tipe: "t".into(),
            },
        ];
        let report = service(&bus).publish_batch(&requests).await;
        assert_eq!(report.accepted, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, 1);
        assert!(!report.is_success());
        assert_eq!(bus.published(), 2);
    }
}
