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

use hmauto_common::config::DEFAULT_CHECK_INTERVAL;
use hmauto_metrics::WatchdogMetrics;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::probe::Prober;
use crate::remediation::{RemediationLoop, RemediationOutcome};

/// Counters describing a finished watchdog run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogSummary {
    /// Ticks that fired.
    pub ticks: u64,
    /// Ticks whose probe failed and started remediation.
    pub outages: u64,
    /// Remediation runs that confirmed recovery.
    pub recoveries: u64,
}

/// Periodic connectivity check that hands outages to a [`RemediationLoop`].
///
/// Remediation is awaited inline, so at most one run is active and ticks that
/// fall due meanwhile are skipped rather than queued.
#[derive(Clone)]
pub struct Watchdog {
    prober: Arc<dyn Prober>,
    remediation: RemediationLoop,
    interval: Duration,
    metrics: Option<WatchdogMetrics>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("interval", &self.interval)
            .field("remediation", &self.remediation)
            .finish_non_exhaustive()
    }
}

impl Watchdog {
    /// Watch `remediation.target().check_address` every `interval`.
    pub fn new(prober: Arc<dyn Prober>, remediation: RemediationLoop, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                fallback_ms = DEFAULT_CHECK_INTERVAL.as_millis() as u64,
                "watchdog interval must be positive; using default"
            );
            DEFAULT_CHECK_INTERVAL
        } else {
            interval
        };
        Self {
            prober,
            remediation,
            interval,
            metrics: None,
        }
    }

    /// Record probes and outages in prometheus.
    pub fn with_metrics(mut self, metrics: WatchdogMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Tick period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until `cancel` fires. Never fails; outages that are not resolved are
    /// retried from the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> WatchdogSummary {
        let span = info_span!(
            "watchdog",
            check_address = %self.remediation.target().check_address,
            interval_ms = self.interval.as_millis() as u64,
        );
        self.run_inner(cancel).instrument(span).await
    }

    async fn run_inner(&self, cancel: CancellationToken) -> WatchdogSummary {
        let check_address = self.remediation.target().check_address.clone();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut summary = WatchdogSummary::default();
        info!("watchdog started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            summary.ticks += 1;

            let reachable = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                reachable = self.prober.probe(&check_address) => reachable,
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_probe("internet", reachable);
            }
            if reachable {
                debug!("internet check passed");
                continue;
            }

            summary.outages += 1;
            if let Some(metrics) = &self.metrics {
                metrics.inc_outage();
            }
            warn!("internet check failed; starting remediation");

            let outcome = self.remediation.run(&cancel).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_run(outcome.as_str());
            }
            match outcome {
                RemediationOutcome::Recovered { attempts } => {
                    summary.recoveries += 1;
                    info!(attempts, "outage resolved");
                }
                RemediationOutcome::Cancelled { attempts } => {
                    debug!(attempts, "remediation cancelled");
                    break;
                }
                RemediationOutcome::TimedOut { attempts, elapsed } => {
                    warn!(
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "outage unresolved; waiting for next tick"
                    );
                }
            }
        }

        info!(
            ticks = summary.ticks,
            outages = summary.outages,
            recoveries = summary.recoveries,
            "watchdog stopped"
        );
        summary
    }
}
