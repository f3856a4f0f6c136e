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
use hmauto_common::AlertConfig;
use hmauto_msg::Subscription;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discord::DiscordWebhook;
use crate::level::AlertLevel;
use crate::service::AlertEvent;
use crate::{AlertError, Result};

/// Final delivery target for alerts of one level.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one event. No retries.
    async fn deliver(&self, event: &AlertEvent) -> Result<()>;
}

/// Sinks keyed by level.
#[derive(Clone, Default)]
pub struct AlertSinks {
    info: Option<Arc<dyn AlertSink>>,
    warning: Option<Arc<dyn AlertSink>>,
    error: Option<Arc<dyn AlertSink>>,
}

impl AlertSinks {
    /// Register `sink` for `level`, replacing any previous one.
    pub fn with(mut self, level: AlertLevel, sink: Arc<dyn AlertSink>) -> Self {
        *self.slot(level) = Some(sink);
        self
    }

    /// One Discord webhook per configured level.
    pub fn from_config(config: &AlertConfig) -> Result<Self> {
        let mut sinks = Self::default();
        for (level, url) in [
            (AlertLevel::Info, &config.info_webhook),
            (AlertLevel::Warning, &config.warning_webhook),
            (AlertLevel::Error, &config.error_webhook),
        ] {
            match url.as_deref().map(str::trim) {
                Some(url) if !url.is_empty() => {
                    let webhook = DiscordWebhook::new(url, config.request_timeout)?;
                    sinks = sinks.with(level, Arc::new(webhook));
                }
                _ => warn!(level = %level, "no webhook configured; alerts at this level are dropped"),
            }
        }
        Ok(sinks)
    }

    fn slot(&mut self, level: AlertLevel) -> &mut Option<Arc<dyn AlertSink>> {
        match level {
            AlertLevel::Info => &mut self.info,
            AlertLevel::Warning => &mut self.warning,
            AlertLevel::Error => &mut self.error,
        }
    }

    fn get(&self, level: AlertLevel) -> Option<&Arc<dyn AlertSink>> {
        match level {
            AlertLevel::Info => self.info.as_ref(),
            AlertLevel::Warning => self.warning.as_ref(),
            AlertLevel::Error => self.error.as_ref(),
        }
    }
}

/// Consumes alert events from the bus and hands them to the sink for their level.
#[derive(Clone)]
pub struct AlertDispatcher {
    sinks: AlertSinks,
}

impl AlertDispatcher {
    /// Create a dispatcher over `sinks`.
    pub fn new(sinks: AlertSinks) -> Self {
        Self { sinks }
    }

    /// Deliver a single event.
    pub async fn dispatch(&self, event: &AlertEvent) -> Result<()> {
        let level: AlertLevel = event.level.parse()?;
        let sink = self.sinks.get(level).ok_or(AlertError::NoSink(level))?;
        sink.deliver(event).await
    }

    /// Run until cancelled or until the bus goes away. Failures are logged per event.
    pub async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        info!(pattern = %subscription.pattern(), "alert dispatcher started");
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = subscription.recv() => message,
            };
            let Some(message) = message else {
                warn!("alert bus closed; dispatcher exiting");
                break;
            };
            let event: AlertEvent = match message.decode() {
                Ok(event) => event,
                Err(err) => {
                    warn!(routing_key = %message.routing_key, error = %err, "discarding undecodable alert");
                    continue;
                }
            };
            match self.dispatch(&event).await {
                Ok(()) => debug!(level = %event.level, category = %event.kind, "alert delivered"),
                Err(err) => warn!(
                    level = %event.level,
                    category = %event.kind,
                    error = %err,
                    "alert delivery failed"
                ),
            }
        }
        info!("alert dispatcher stopped");
    }
}
