//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Named state model, stores and transition service."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hmauto_alert::{AlertLevel, Notifier};
use hmauto_metrics::StateMetrics;
use hmauto_msg::ChangePublisher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::model::State;
use crate::policy::{TransitionPolicy, SWITCH_OFF, SWITCH_ON, SWITCH_TYPE};
use crate::store::StateStore;
use crate::{Result, StateError};

/// Alert category for committed state changes.
pub const STATE_CHANGE_CATEGORY: &str = "Hmstate Change";

/// Validates and applies state transitions.
///
/// A write is validated against the [`TransitionPolicy`] before anything else
/// happens. Accepted writes lock the row, stage the new value (durably, for the
/// file backend), publish it on `<channel>.<namespace key>` and only then commit;
/// a failed publish rolls the write back.
#[derive(Clone)]
pub struct StateService {
    store: Arc<dyn StateStore>,
    publisher: Arc<dyn ChangePublisher>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Option<StateMetrics>,
    policy: Arc<TransitionPolicy>,
    channel: String,
}

impl std::fmt::Debug for StateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateService")
            .field("channel", &self.channel)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl StateService {
    /// Service over `store`, announcing changes through `publisher` under `channel`.
    pub fn new(
        store: Arc<dyn StateStore>,
        publisher: Arc<dyn ChangePublisher>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            store,
            publisher,
            notifier: None,
            metrics: None,
            policy: Arc::new(TransitionPolicy::default()),
            channel: channel.into(),
        }
    }

    /// Send an info alert after every committed change.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record transitions in prometheus.
    pub fn with_metrics(mut self, metrics: StateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the default switch-only policy.
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Active policy.
    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    /// Current value of `(state_type, key)`.
    pub async fn get_state(&self, state_type: &str, key: &str) -> Result<String> {
        Ok(self.get_state_detail(state_type, key).await?.value)
    }

    /// Full record of `(state_type, key)`.
    pub async fn get_state_detail(&self, state_type: &str, key: &str) -> Result<State> {
        let state_key = self.policy.validate_key(state_type, key)?;
        let namespace_key = state_key.namespace_key();
        self.store
            .get(&namespace_key)
            .await?
            .ok_or(StateError::NotFound(namespace_key))
    }

    /// Every record, ascending by namespace key.
    pub async fn list_states(&self) -> Result<Vec<State>> {
        Ok(self.store.list().await?)
    }

    /// Validate and apply a write. Repeating the same value is a new write.
    #[instrument(name = "set_state", skip(self))]
    pub async fn set_state(&self, state_type: &str, key: &str, value: &str) -> Result<State> {
        let state_key = match self.policy.validate(state_type, key, value) {
            Ok(state_key) => state_key,
            Err(err) => {
                warn!(error = %err, "state change rejected");
                self.record(state_type, "rejected");
                return Err(err);
            }
        };
        let namespace_key = state_key.namespace_key();

        let mut tx = self.store.begin(&namespace_key).await.map_err(|err| {
            self.record(state_type, "store_failed");
            StateError::from(err)
        })?;

        let mut state = match tx.current() {
            Some(current) => current.clone(),
            None => {
                debug!(namespace_key = %namespace_key, "creating state on first write");
                State::new(&state_key, value)
            }
        };
        let previous_update = tx.current().map(|current| current.updated_at);
        state.value = value.to_owned();
        state.updated_at = Utc::now();
        if let Some(previous) = previous_update {
            if state.updated_at <= previous {
                state.updated_at = previous + chrono::Duration::microseconds(1);
            }
        }

        if let Err(err) = tx.save(state.clone()).await {
            error!(error = %err, "staging state write failed");
            self.record(state_type, "store_failed");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed save also failed");
            }
            return Err(err.into());
        }

        let routing_key = format!("{}.{}", self.channel, namespace_key);
        if let Err(err) = self.publisher.publish(&routing_key, value).await {
            error!(routing_key = %routing_key, error = %err, "state change publish failed; rolling back");
            self.record(state_type, "publish_failed");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback after failed publish also failed");
            }
            return Err(err.into());
        }

        if let Err(err) = tx.commit().await {
            error!(error = %err, "state commit failed after publish");
            self.record(state_type, "store_failed");
            return Err(err.into());
        }

        info!(namespace_key = %namespace_key, value, "state changed");
        self.record(state_type, "applied");
        self.spawn_change_alert(&namespace_key, value);
        Ok(state)
    }

    /// Power-cycle a switch: OFF, wait `settle`, ON.
    ///
    /// Cancellation cuts the settle short but the ON write is still issued, so a
    /// shutdown never leaves the switch powered off.
    pub async fn restart_switch(
        &self,
        key: &str,
        settle: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(key, settle_ms = settle.as_millis() as u64, "restarting switch");
        self.set_state(SWITCH_TYPE, key, SWITCH_OFF).await?;
        tokio::select! {
            _ = cancel.cancelled() => warn!(key, "settle interrupted by cancellation"),
            _ = tokio::time::sleep(settle) => {}
        }
        self.set_state(SWITCH_TYPE, key, SWITCH_ON).await?;
        Ok(())
    }

    fn record(&self, state_type: &str, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(state_type, result);
        }
    }

    fn spawn_change_alert(&self, namespace_key: &str, value: &str) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let message = format!("State {namespace_key} changed to {value}");
        tokio::spawn(
            async move {
                if let Err(err) = notifier
                    .notify(AlertLevel::Info, STATE_CHANGE_CATEGORY, &message)
                    .await
                {
                    warn!(error = %err, "state change alert not delivered");
                }
            }
            .in_current_span(),
        );
    }
}
