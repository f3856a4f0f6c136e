//! ---
//! hma_section: "02-messaging-ipc-data-model"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Topic bus and message envelope."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::types::BusMessage;
use crate::{BusError, Result};

/// Broadcasts `(routing key, value)` pairs to interested consumers.
#[async_trait]
pub trait ChangePublisher: Send + Sync {
    /// Publish a plain-text body under `routing_key`.
    async fn publish(&self, routing_key: &str, body: &str) -> Result<()>;

    /// Publish a prepared envelope. The default forwards the body only.
    async fn publish_message(&self, message: BusMessage) -> Result<()> {
        self.publish(&message.routing_key, &message.body).await
    }
}

/// AMQP-style topic match: `*` is exactly one word, `#` is zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && match_words(rest, tail),
            None => false,
        },
    }
}

fn validate_routing_key(routing_key: &str) -> Result<()> {
    let invalid = routing_key.is_empty()
        || routing_key
            .split('.')
            .any(|word| word.is_empty() || word == "*" || word == "#");
    if invalid {
        return Err(BusError::InvalidRoutingKey(routing_key.to_owned()));
    }
    Ok(())
}

#[derive(Debug)]
struct BusInner {
    sender: broadcast::Sender<BusMessage>,
    closed: AtomicBool,
    published: AtomicU64,
}

/// In-process topic exchange backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct TopicBus {
    inner: Arc<BusInner>,
}

impl TopicBus {
    /// Create a bus that buffers up to `capacity` messages per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                sender,
                closed: AtomicBool::new(false),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to every message whose routing key matches `pattern`.
    pub fn subscribe(&self, pattern: impl Into<String>) -> Subscription {
        Subscription {
            pattern: pattern.into(),
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Reject further publishes. Existing subscribers drain what is buffered.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Whether [`TopicBus::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of messages accepted since creation.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    fn send(&self, message: BusMessage) -> Result<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        validate_routing_key(&message.routing_key)?;
        let routing_key = message.routing_key.clone();
        match self.inner.sender.send(message) {
            Ok(receivers) => debug!(routing_key = %routing_key, receivers, "bus message published"),
            // No subscriber is not a delivery failure for a fire-and-forget exchange.
            Err(_) => debug!(routing_key = %routing_key, "bus message published without subscribers"),
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl ChangePublisher for TopicBus {
    async fn publish(&self, routing_key: &str, body: &str) -> Result<()> {
        self.send(BusMessage::text(routing_key, body))
    }

    async fn publish_message(&self, message: BusMessage) -> Result<()> {
        self.send(message)
    }
}

/// Filtered view over the bus.
#[derive(Debug)]
pub struct Subscription {
    pattern: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    /// Topic pattern this subscription filters on.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Wait for the next matching message. `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if topic_matches(&self.pattern, &message.routing_key) => {
                    return Some(message)
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(pattern = %self.pattern, skipped, "subscriber lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Applies an acknowledgement deadline to any publisher.
#[derive(Debug, Clone)]
pub struct TimeoutPublisher<P> {
    inner: P,
    timeout: Duration,
}

impl<P> TimeoutPublisher<P> {
    /// Wrap `inner`, failing publishes that take longer than `timeout`.
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Access the wrapped publisher.
    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: ChangePublisher> ChangePublisher for TimeoutPublisher<P> {
    async fn publish(&self, routing_key: &str, body: &str) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.inner.publish(routing_key, body)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout {
                routing_key: routing_key.to_owned(),
                timeout: self.timeout,
            }),
        }
    }

    async fn publish_message(&self, message: BusMessage) -> Result<()> {
        let routing_key = message.routing_key.clone();
        match tokio::time::timeout(self.timeout, self.inner.publish_message(message)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout {
                routing_key,
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledPublisher;

    #[async_trait]
    impl ChangePublisher for StalledPublisher {
        async fn publish(&self, _routing_key: &str, _body: &str) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[test]
    fn topic_wildcards_follow_amqp_rules() {
        assert!(topic_matches("hmstt_channel.#", "hmstt_channel.hmstt.switch.a"));
        assert!(topic_matches("hmstt_channel.#", "hmstt_channel"));
        assert!(topic_matches("a.*.c", "a.b.c"));
        assert!(!topic_matches("a.*.c", "a.b.x.c"));
        assert!(topic_matches("a.#.c", "a.b.x.c"));
        assert!(!topic_matches("a.b", "a.b.c"));
        assert!(topic_matches("#", "anything.at.all"));
    }

    #[tokio::test]
    async fn subscribers_only_see_matching_topics() {
        let bus = TopicBus::new(16);
        let mut switches = bus.subscribe("hmstt_channel.hmstt.switch.*");
        bus.publish("hmalert_channel.info", "{}").await.unwrap();
        bus.publish("hmstt_channel.hmstt.switch.server_1", "on")
            .await
            .unwrap();

        let message = switches.recv().await.unwrap();
        assert_eq!(message.routing_key, "hmstt_channel.hmstt.switch.server_1");
        assert_eq!(message.body, "on");
        assert_eq!(bus.published(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_acknowledged() {
        let bus = TopicBus::new(4);
        assert!(bus.publish("a.b", "x").await.is_ok());
    }

    #[tokio::test]
    async fn closed_bus_and_bad_keys_are_rejected() {
        let bus = TopicBus::new(4);
        assert!(matches!(
            bus.publish("a..b", "x").await,
            Err(BusError::InvalidRoutingKey(_))
        ));
        bus.close();
        assert!(matches!(bus.publish("a.b", "x").await, Err(BusError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_publisher_fails_stalled_publishes() {
        let publisher = TimeoutPublisher::new(StalledPublisher, Duration::from_secs(5));
        let result = publisher.publish("a.b", "x").await;
        assert!(matches!(result, Err(BusError::Timeout { .. })));
    }
}
