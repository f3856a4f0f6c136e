//! ---
//! hma_section: "03-persistence-logging"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Metrics collection and export utilities."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let local_addr = std_listener.local_addr().unwrap_or(addr);
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "hmautod_starts_total",
            "Total number of times the HM-Auto daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "hmautod_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Connectivity watchdog and remediation loop instrumentation.
#[derive(Clone)]
pub struct WatchdogMetrics {
    probes: IntCounterVec,
    outages: IntCounter,
    attempts: IntCounterVec,
    restarts: IntCounter,
    runs: IntCounterVec,
    backoff_seconds: Histogram,
}

impl WatchdogMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let probes = IntCounterVec::new(
            Opts::new(
                "hmauto_watchdog_probes_total",
                "Reachability probes issued, by target role and result",
            ),
            &["target", "result"],
        )?;
        registry.register(Box::new(probes.clone()))?;

        let outages = IntCounter::with_opts(Opts::new(
            "hmauto_watchdog_outages_total",
            "Outages detected by the periodic internet check",
        ))?;
        registry.register(Box::new(outages.clone()))?;

        let attempts = IntCounterVec::new(
            Opts::new(
                "hmauto_remediation_attempts_total",
                "Remediation loop iterations by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(attempts.clone()))?;

        let restarts = IntCounter::with_opts(Opts::new(
            "hmauto_remediation_restarts_total",
            "Switch restart pulses completed by the remediation loop",
        ))?;
        registry.register(Box::new(restarts.clone()))?;

        let runs = IntCounterVec::new(
            Opts::new(
                "hmauto_remediation_runs_total",
                "Remediation loop invocations by terminal result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(runs.clone()))?;

        let backoff_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "hmauto_remediation_backoff_seconds",
                "Backoff delay scheduled between remediation attempts",
            )
            .buckets(prometheus::exponential_buckets(0.5, 2.0, 12)?),
        )?;
        registry.register(Box::new(backoff_seconds.clone()))?;

        Ok(Self {
            probes,
            outages,
            attempts,
            restarts,
            runs,
            backoff_seconds,
        })
    }

    pub fn record_probe(&self, target: &str, reachable: bool) {
        let result = if reachable { "reachable" } else { "unreachable" };
        self.probes.with_label_values(&[target, result]).inc();
    }

    pub fn inc_outage(&self) {
        self.outages.inc();
    }

    pub fn record_attempt(&self, outcome: &str) {
        self.attempts.with_label_values(&[outcome]).inc();
    }

    pub fn inc_restart(&self) {
        self.restarts.inc();
    }

    pub fn record_run(&self, result: &str) {
        self.runs.with_label_values(&[result]).inc();
    }

    pub fn observe_backoff(&self, delay: Duration) {
        self.backoff_seconds.observe(delay.as_secs_f64());
    }
}

impl std::fmt::Debug for WatchdogMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogMetrics").finish_non_exhaustive()
    }
}

/// State transition instrumentation.
#[derive(Clone)]
pub struct StateMetrics {
    transitions: IntCounterVec,
}

impl StateMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let transitions = IntCounterVec::new(
            Opts::new(
                "hmauto_state_transitions_total",
                "State writes by type and result",
            ),
            &["state_type", "result"],
        )?;
        registry.register(Box::new(transitions.clone()))?;
        Ok(Self { transitions })
    }

    pub fn record_transition(&self, state_type: &str, result: &str) {
        self.transitions
            .with_label_values(&[state_type, result])
            .inc();
    }
}

impl std::fmt::Debug for StateMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let families = registry.gather();
        let family = families.iter().find(|fam| fam.get_name() == name)?;
        family
            .get_metric()
            .iter()
            .find(|metric| {
                labels.iter().all(|(key, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|label| label.get_name() == *key && label.get_value() == *value)
                })
            })
            .map(|metric| metric.get_counter().get_value())
    }

    #[test]
    fn watchdog_metrics_register_and_count() {
        let registry = new_registry();
        let metrics = WatchdogMetrics::new(registry.clone()).unwrap();
        metrics.record_probe("internet", false);
        metrics.record_probe("internet", false);
        metrics.record_attempt("recovered");

        assert_eq!(
            counter_value(
                &registry,
                "hmauto_watchdog_probes_total",
                &[("target", "internet"), ("result", "unreachable")]
            ),
            Some(2.0)
        );
        assert_eq!(
            counter_value(
                &registry,
                "hmauto_remediation_attempts_total",
                &[("outcome", "recovered")]
            ),
            Some(1.0)
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        StateMetrics::new(registry.clone()).unwrap();
        assert!(StateMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_text_exposition() {
        let registry = new_registry();
        let metrics = WatchdogMetrics::new(registry.clone()).unwrap();
        metrics.inc_outage();
        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(server.addr().port(), 0);

        let response = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            prometheus::TEXT_FORMAT
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("hmauto_watchdog_outages_total 1"));

        server.shutdown().await.unwrap();
    }
}
