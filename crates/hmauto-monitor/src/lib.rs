//! ---
//! hma_section: "07-resilience-fault-tolerance"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Connectivity watchdog and remediation."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Internet connectivity watchdog: periodic probing, and a jittered backoff
//! loop that power-cycles the modem switch until the uplink answers again.

pub mod backoff;
pub mod probe;
pub mod remediation;
pub mod watchdog;

use std::sync::Arc;

use hmauto_alert::Notifier;
use hmauto_common::InternetCheckConfig;
use hmauto_metrics::WatchdogMetrics;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use probe::{build_prober, PingProber, Prober, TcpProber};
pub use remediation::{
    AttemptOutcome, RemediationLoop, RemediationOutcome, RemediationTarget, SwitchActuator,
    INTERNET_CHECK_CATEGORY, INTERNET_UP_MESSAGE, MODEM_DOWN_MESSAGE, RESTARTING_MESSAGE,
};
pub use watchdog::{Watchdog, WatchdogSummary};

/// Assemble a watchdog from the `[internet_check]` section.
pub fn watchdog_from_config(
    config: &InternetCheckConfig,
    prober: Arc<dyn Prober>,
    actuator: Arc<dyn SwitchActuator>,
    notifier: Option<Arc<dyn Notifier>>,
    metrics: Option<WatchdogMetrics>,
) -> Watchdog {
    let mut remediation = RemediationLoop::new(
        prober.clone(),
        actuator,
        BackoffPolicy::from_config(&config.backoff),
        RemediationTarget::from_config(config),
    );
    if let Some(notifier) = notifier {
        remediation = remediation.with_notifier(notifier);
    }
    if let Some(metrics) = &metrics {
        remediation = remediation.with_metrics(metrics.clone());
    }
    let watchdog = Watchdog::new(prober, remediation, config.effective_interval());
    match metrics {
        Some(metrics) => watchdog.with_metrics(metrics),
        None => watchdog,
    }
}
