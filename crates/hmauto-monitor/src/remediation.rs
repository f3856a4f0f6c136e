//! ---
//! hma_section: "07-resilience-fault-tolerance"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Connectivity watchdog and remediation."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmauto_alert::{AlertLevel, Notifier};
use hmauto_common::InternetCheckConfig;
use hmauto_metrics::WatchdogMetrics;
use hmauto_state::StateService;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backoff::BackoffPolicy;
use crate::probe::Prober;

/// Alert category for everything the remediation loop reports.
pub const INTERNET_CHECK_CATEGORY: &str = "Internet Check";
/// Warning sent when the modem itself does not answer.
pub const MODEM_DOWN_MESSAGE: &str = "Modem connection is down, cannot restart modem ⚠️";
/// Info sent once the internet answers again.
pub const INTERNET_UP_MESSAGE: &str = "Internet connection is up ✅";
/// Info sent right before a restart pulse.
pub const RESTARTING_MESSAGE: &str = "Internet connection is down ❌, restarting modem 🔄";

/// Something that can power-cycle a named switch.
#[async_trait]
pub trait SwitchActuator: Send + Sync {
    /// OFF, wait `settle`, ON. Cancellation may shorten the wait.
    async fn restart(
        &self,
        key: &str,
        settle: Duration,
        cancel: &CancellationToken,
    ) -> hmauto_state::Result<()>;
}

#[async_trait]
impl SwitchActuator for StateService {
    async fn restart(
        &self,
        key: &str,
        settle: Duration,
        cancel: &CancellationToken,
    ) -> hmauto_state::Result<()> {
        self.restart_switch(key, settle, cancel).await
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The modem's management address did not answer; nothing was actuated.
    ModemUnreachable,
    /// The restart pulse failed part way.
    RestartFailed,
    /// The pulse completed; connectivity is rechecked next attempt.
    StillDown,
    /// The internet answered.
    Recovered,
    /// Cancellation was observed mid-attempt.
    Cancelled,
}

impl AttemptOutcome {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::ModemUnreachable => "modem_unreachable",
            AttemptOutcome::RestartFailed => "restart_failed",
            AttemptOutcome::StillDown => "still_down",
            AttemptOutcome::Recovered => "recovered",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }
}

/// Terminal state of one remediation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Connectivity confirmed after `attempts` iterations.
    Recovered {
        /// Iterations executed, including the successful one.
        attempts: u32,
    },
    /// Stopped by the cancellation token.
    Cancelled {
        /// Iterations started before cancellation.
        attempts: u32,
    },
    /// The backoff policy's elapsed-time budget ran out.
    TimedOut {
        /// Iterations executed.
        attempts: u32,
        /// Time spent in the run.
        elapsed: Duration,
    },
}

impl RemediationOutcome {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationOutcome::Recovered { .. } => "recovered",
            RemediationOutcome::Cancelled { .. } => "cancelled",
            RemediationOutcome::TimedOut { .. } => "timed_out",
        }
    }

    /// Iterations executed.
    pub fn attempts(&self) -> u32 {
        match self {
            RemediationOutcome::Recovered { attempts }
            | RemediationOutcome::Cancelled { attempts }
            | RemediationOutcome::TimedOut { attempts, .. } => *attempts,
        }
    }
}

/// Addresses and switch the loop works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationTarget {
    /// Address that proves the uplink works.
    pub check_address: String,
    /// Management address of the modem behind the switch.
    pub modem_address: String,
    /// Switch key to pulse.
    pub switch_key: String,
    /// Time between the OFF and ON writes.
    pub settle: Duration,
}

impl RemediationTarget {
    /// Target described by the `[internet_check]` section.
    pub fn from_config(config: &InternetCheckConfig) -> Self {
        Self {
            check_address: config.check_address.clone(),
            modem_address: config.modem_address.clone(),
            switch_key: config.switch_key.clone(),
            settle: config.effective_settle(),
        }
    }
}

/// Backoff-driven retry protocol run once per detected outage.
///
/// Each attempt probes the modem, then the internet, and pulses the switch when
/// the modem is up but the internet is not. The run ends on the first reachable
/// internet probe, on cancellation, or when a bounded backoff policy runs out of
/// elapsed time.
#[derive(Clone)]
pub struct RemediationLoop {
    prober: Arc<dyn Prober>,
    actuator: Arc<dyn SwitchActuator>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Option<WatchdogMetrics>,
    policy: BackoffPolicy,
    target: RemediationTarget,
    seed: Option<u64>,
}

impl std::fmt::Debug for RemediationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationLoop")
            .field("policy", &self.policy)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl RemediationLoop {
    /// Loop over `target` using `policy` between attempts.
    pub fn new(
        prober: Arc<dyn Prober>,
        actuator: Arc<dyn SwitchActuator>,
        policy: BackoffPolicy,
        target: RemediationTarget,
    ) -> Self {
        Self {
            prober,
            actuator,
            notifier: None,
            metrics: None,
            policy,
            target,
            seed: None,
        }
    }

    /// Report progress to operators.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Record attempts and backoff in prometheus.
    pub fn with_metrics(mut self, metrics: WatchdogMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fixed jitter seed for reproducible schedules.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Monitored target.
    pub fn target(&self) -> &RemediationTarget {
        &self.target
    }

    /// Run until recovery, cancellation or timeout.
    pub async fn run(&self, cancel: &CancellationToken) -> RemediationOutcome {
        let span = info_span!("remediation", switch_key = %self.target.switch_key);
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> RemediationOutcome {
        let mut backoff = match self.seed {
            Some(seed) => self.policy.start_seeded(seed),
            None => self.policy.start(),
        };
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return RemediationOutcome::Cancelled { attempts };
            }
            attempts += 1;
            let outcome = self.attempt(cancel).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_attempt(outcome.as_str());
            }

            match outcome {
                AttemptOutcome::Recovered => {
                    info!(attempts, "internet connectivity recovered");
                    return RemediationOutcome::Recovered { attempts };
                }
                AttemptOutcome::Cancelled => return RemediationOutcome::Cancelled { attempts },
                _ => {}
            }

            let Some(delay) = backoff.next_delay() else {
                let elapsed = backoff.elapsed();
                warn!(
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "remediation gave up after exhausting its time budget"
                );
                return RemediationOutcome::TimedOut { attempts, elapsed };
            };
            if let Some(metrics) = &self.metrics {
                metrics.observe_backoff(delay);
            }
            info!(
                attempt = attempts,
                outcome = outcome.as_str(),
                delay_ms = delay.as_millis() as u64,
                "remediation attempt failed; backing off"
            );

            tokio::select! {
                _ = cancel.cancelled() => return RemediationOutcome::Cancelled { attempts },
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One probe-modem, probe-internet, actuate pass.
    pub async fn attempt(&self, cancel: &CancellationToken) -> AttemptOutcome {
        let Some(modem_up) = self.probe("modem", &self.target.modem_address, cancel).await else {
            return AttemptOutcome::Cancelled;
        };
        if !modem_up {
            warn!(address = %self.target.modem_address, "modem unreachable; skipping restart");
            self.notify(AlertLevel::Warning, MODEM_DOWN_MESSAGE).await;
            return AttemptOutcome::ModemUnreachable;
        }

        let Some(internet_up) = self
            .probe("internet", &self.target.check_address, cancel)
            .await
        else {
            return AttemptOutcome::Cancelled;
        };
        if internet_up {
            self.notify(AlertLevel::Info, INTERNET_UP_MESSAGE).await;
            return AttemptOutcome::Recovered;
        }

        self.notify(AlertLevel::Info, RESTARTING_MESSAGE).await;
        match self
            .actuator
            .restart(&self.target.switch_key, self.target.settle, cancel)
            .await
        {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_restart();
                }
                debug!(switch_key = %self.target.switch_key, "restart pulse completed");
                AttemptOutcome::StillDown
            }
            Err(err) => {
                warn!(switch_key = %self.target.switch_key, error = %err, "restart pulse failed");
                AttemptOutcome::RestartFailed
            }
        }
    }

    async fn probe(&self, role: &str, address: &str, cancel: &CancellationToken) -> Option<bool> {
        let reachable = tokio::select! {
            _ = cancel.cancelled() => return None,
            reachable = self.prober.probe(address) => reachable,
        };
        debug!(role, address, reachable, "probe finished");
        if let Some(metrics) = &self.metrics {
            metrics.record_probe(role, reachable);
        }
        Some(reachable)
    }

    async fn notify(&self, level: AlertLevel, message: &str) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(err) = notifier
            .notify(level, INTERNET_CHECK_CATEGORY, message)
            .await
        {
            warn!(level = %level, error = %err, "remediation alert not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    #[derive(Default)]
    struct ScriptedProber {
        scripts: Mutex<HashMap<String, VecDeque<bool>>>,
        fallback: Mutex<HashMap<String, bool>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProber {
        fn script(self, address: &str, results: &[bool], then: bool) -> Self {
            self.scripts
                .lock()
                .insert(address.to_owned(), results.iter().copied().collect());
            self.fallback.lock().insert(address.to_owned(), then);
            self
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, address: &str) -> bool {
            self.calls.lock().push(address.to_owned());
            let scripted = self
                .scripts
                .lock()
                .get_mut(address)
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| *self.fallback.lock().get(address).unwrap_or(&false))
        }
    }

    #[derive(Default)]
    struct CountingActuator {
        pulses: Mutex<u32>,
    }

    #[async_trait]
    impl SwitchActuator for CountingActuator {
        async fn restart(
            &self,
            _key: &str,
            settle: Duration,
            _cancel: &CancellationToken,
        ) -> hmauto_state::Result<()> {
            tokio::time::sleep(settle).await;
            *self.pulses.lock() += 1;
            Ok(())
        }
    }

    fn target() -> RemediationTarget {
        RemediationTarget {
            check_address: "1.1.1.1".into(),
            modem_address: "10.10.10.1".into(),
            switch_key: "server_1".into(),
            settle: Duration::from_millis(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pulses_once_per_failed_internet_probe() {
        let prober = Arc::new(
            ScriptedProber::default()
                .script("10.10.10.1", &[], true)
                .script("1.1.1.1", &[false, false, false], true),
        );
        let actuator = Arc::new(CountingActuator::default());
        let remediation = RemediationLoop::new(
            prober.clone(),
            actuator.clone(),
            BackoffPolicy::default(),
            target(),
        )
        .with_seed(11);

        let outcome = remediation.run(&CancellationToken::new()).await;

        assert_eq!(outcome, RemediationOutcome::Recovered { attempts: 4 });
        assert_eq!(*actuator.pulses.lock(), 3);
        let calls = prober.calls.lock();
        assert_eq!(calls.first().map(String::as_str), Some("10.10.10.1"));
        assert_eq!(calls.iter().filter(|a| *a == "10.10.10.1").count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_modem_never_actuates_and_stops_on_cancel() {
        let prober = Arc::new(ScriptedProber::default().script("10.10.10.1", &[], false));
        let actuator = Arc::new(CountingActuator::default());
        let remediation =
            RemediationLoop::new(prober, actuator.clone(), BackoffPolicy::default(), target())
                .with_seed(5);
        let cancel = CancellationToken::new();

        let runner = {
            let cancel = cancel.clone();
            tokio::spawn(async move { remediation.run(&cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(3600)).await;
        cancel.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("loop did not stop within the window")
            .unwrap();

        assert!(matches!(outcome, RemediationOutcome::Cancelled { attempts } if attempts > 3));
        assert_eq!(*actuator.pulses.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_policy_times_out() {
        let prober = Arc::new(ScriptedProber::default().script("10.10.10.1", &[], false));
        let policy = BackoffPolicy {
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..BackoffPolicy::default()
        };
        let remediation = RemediationLoop::new(
            prober,
            Arc::new(CountingActuator::default()),
            policy,
            target(),
        )
        .with_seed(2);

        let outcome = remediation.run(&CancellationToken::new()).await;
        assert_eq!(outcome.as_str(), "timed_out");
        assert!(outcome.attempts() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_run_does_nothing() {
        let prober = Arc::new(ScriptedProber::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let remediation = RemediationLoop::new(
            prober.clone(),
            Arc::new(CountingActuator::default()),
            BackoffPolicy::default(),
            target(),
        );
        assert_eq!(
            remediation.run(&cancel).await,
            RemediationOutcome::Cancelled { attempts: 0 }
        );
        assert!(prober.calls.lock().is_empty());
    }
}
