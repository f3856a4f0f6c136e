//! ---
//! hma_section: "01-core-functionality"
//! hma_subsection: "binary"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Binary entrypoint for the HM-Auto daemon."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hmauto_alert::{AlertDispatcher, AlertService, AlertSinks, Notifier};
use hmauto_api::{spawn_api_server, ApiServer, ApiState};
use hmauto_common::{init_tracing, AppConfig, LoadedAppConfig, LogFormat, MetricsConfig};
use hmauto_metrics::{
    new_registry, spawn_http_server, DaemonMetrics, MetricsServer, SharedRegistry, StateMetrics,
    WatchdogMetrics,
};
use hmauto_monitor::{build_prober, watchdog_from_config, BackoffPolicy};
use hmauto_msg::{TimeoutPublisher, TopicBus};
use hmauto_state::{open_store, StateService};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "hmautod";
const DEFAULT_CANDIDATES: [&str; 2] = ["conf/hmauto.toml", "configs/hmauto.toml"];
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(author, version, about = "HM-Auto site controller daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FORMAT",
        help = "Override logging.format (structured-json | pretty)"
    )]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the controller (default)")]
    Run,
    #[command(about = "Load and validate configuration, then print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let load_started = Instant::now();
    let LoadedAppConfig { mut config, source } = match &cli.config {
        Some(path) => LoadedAppConfig {
            config: AppConfig::from_path(path)?,
            source: path.clone(),
        },
        None => AppConfig::load_with_source(&DEFAULT_CANDIDATES)?,
    };
    let load_duration = load_started.elapsed();
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_tracing(SERVICE_NAME, &config.logging)?;
    info!(config_path = %source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => check_config(&config, &source),
        Commands::Run => {
            let registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            run_daemon(config, registry).await
        }
    }
}

fn check_config(config: &AppConfig, source: &Path) -> Result<()> {
    let rendered =
        toml::to_string_pretty(config).context("failed to render effective configuration")?;
    let check = &config.internet_check;
    let policy = BackoffPolicy::from_config(&check.backoff);

    println!("# source: {}", source.display());
    println!("{rendered}");
    println!(
        "# internet check: interval={:?} probe_timeout={:?} settle={:?}",
        check.effective_interval(),
        check.effective_probe_timeout(),
        check.effective_settle()
    );
    println!(
        "# backoff: initial={:?} max={:?} max_elapsed={} multiplier={} randomization={}",
        policy.initial_interval,
        policy.max_interval,
        policy
            .max_elapsed_time
            .map(|limit| format!("{limit:?}"))
            .unwrap_or_else(|| "unbounded".to_owned()),
        policy.multiplier,
        policy.randomization_factor
    );
    Ok(())
}

async fn run_daemon(config: AppConfig, registry: SharedRegistry) -> Result<()> {
    let cancel = CancellationToken::new();

    let (metrics_registry, metrics_server) = start_metrics(&config.metrics, registry)?;

    let store = open_store(&config.store)
        .await
        .context("failed to open state store")?;

    let bus = TopicBus::new(config.bus.capacity);
    let publisher = Arc::new(TimeoutPublisher::new(
        bus.clone(),
        config.bus.publish_timeout,
    ));

    let alerts = Arc::new(AlertService::new(
        publisher.clone(),
        config.bus.alert_channel.clone(),
    ));
    let sinks = AlertSinks::from_config(&config.alert).context("failed to configure alert sinks")?;
    let alert_subscription = bus.subscribe(format!("{}.#", config.bus.alert_channel));
    let dispatcher_task = tokio::spawn(
        AlertDispatcher::new(sinks).run(alert_subscription, cancel.clone()),
    );

    let mut states = StateService::new(store, publisher, config.bus.channel.clone())
        .with_notifier(alerts.clone());
    if let Some(registry) = &metrics_registry {
        states = states.with_metrics(StateMetrics::new(registry.clone())?);
    }
    let states = Arc::new(states);

    let mut api_server: Option<ApiServer> = None;
    if config.http.enabled {
        let state = Arc::new(ApiState::new(states.clone(), alerts.clone()));
        match spawn_api_server(state, config.http.listen) {
            Ok(server) => api_server = Some(server),
            Err(err) => warn!(error = %err, "failed to start api server"),
        }
    } else {
        info!("api server disabled by configuration");
    }

    let watchdog_task = if config.internet_check.enabled {
        let watchdog_metrics = metrics_registry
            .as_ref()
            .map(|registry| WatchdogMetrics::new(registry.clone()))
            .transpose()?;
        let notifier: Arc<dyn Notifier> = alerts.clone();
        let watchdog = watchdog_from_config(
            &config.internet_check,
            build_prober(&config.internet_check),
            states.clone(),
            Some(notifier),
            watchdog_metrics,
        );
        info!(
            interval_ms = watchdog.interval().as_millis() as u64,
            check_address = %config.internet_check.check_address,
            switch_key = %config.internet_check.switch_key,
            "connectivity watchdog enabled"
        );
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { watchdog.run(cancel).await }))
    } else {
        info!("connectivity watchdog disabled by configuration");
        None
    };

    info!("daemon running; waiting for termination signal");
    shutdown_signal().await;
    cancel.cancel();

    let shutdown = async {
        // The watchdog goes first so a restart pulse in flight can publish its ON write.
        if let Some(task) = watchdog_task {
            match task.await {
                Ok(summary) => info!(
                    ticks = summary.ticks,
                    outages = summary.outages,
                    recoveries = summary.recoveries,
                    "watchdog stopped"
                ),
                Err(err) => error!(error = %err, "watchdog task failed"),
            }
        }
        if let Some(server) = api_server {
            if let Err(err) = server.shutdown().await {
                warn!(error = %err, "api server shutdown failed");
            }
        }
        if let Some(server) = metrics_server {
            if let Err(err) = server.shutdown().await {
                warn!(error = %err, "metrics server shutdown failed");
            }
        }
        if let Err(err) = dispatcher_task.await {
            error!(error = %err, "alert dispatcher task failed");
        }
    };
    if tokio::time::timeout(SHUTDOWN_BUDGET, shutdown).await.is_err() {
        warn!(
            budget_ms = SHUTDOWN_BUDGET.as_millis() as u64,
            "shutdown budget exceeded; exiting with tasks still running"
        );
    }
    bus.close();
    info!("daemon stopped");
    Ok(())
}

/// Registry handed to components, and the exporter serving it. Both are absent
/// when metrics are disabled.
fn start_metrics(
    config: &MetricsConfig,
    registry: SharedRegistry,
) -> Result<(Option<SharedRegistry>, Option<MetricsServer>)> {
    if !config.enabled {
        info!("metrics exporter disabled by configuration");
        return Ok((None, None));
    }
    info!(address = %config.listen, "metrics exporter enabled");
    let server = spawn_http_server(registry.clone(), config.listen)?;
    Ok((Some(registry), Some(server)))
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        tokio::select! {
            _ = ctrl_c() => info!("ctrl-c received; shutting down"),
            _ = terminate() => info!("SIGTERM received; shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await;
        info!("ctrl-c received; shutting down");
    }
}

async fn ctrl_c() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(?err, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(?err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}
