//! ---
//! hma_section: "01-core-functionality"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Shared primitives and utilities for the controller runtime."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
//! Tracing setup for the daemon.
//!
//! Core code never reaches for a global logger; it logs through `tracing` macros
//! inside spans (`watchdog`, `remediation`, `set_state`) whose fields travel with
//! every event. The JSON layers therefore include the current span so an outage
//! can be followed by `check_address` or `switch_key` alone.

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override read before `RUST_LOG`.
pub const LOG_ENV: &str = "HMAUTO_LOG";

/// HTTP client and server internals stay quiet unless asked for; a webhook
/// delivery or scrape per minute is not worth an info line each.
const DEFAULT_DIRECTIVE: &str = "info,hyper=warn,hyper_util=warn,reqwest=warn,h2=warn";

static GUARDS: OnceCell<(WorkerGuard, WorkerGuard)> = OnceCell::new();

/// Stdout rendering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// One JSON object per line, for journald or a log shipper.
    #[default]
    StructuredJson,
    /// Human readable, for running in a terminal.
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "structured-json" | "json" => Ok(LogFormat::StructuredJson),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Resolve the event filter. `override_directive` is the value of `HMAUTO_LOG`,
/// `rust_log` the value of `RUST_LOG`. An unparsable override falls back to the
/// default rather than silencing the daemon.
pub fn build_filter(override_directive: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    let chosen = override_directive.or(rust_log);
    match chosen.map(EnvFilter::try_new) {
        Some(Ok(filter)) => filter,
        Some(Err(err)) => {
            eprintln!("invalid log directive ({err}); using '{DEFAULT_DIRECTIVE}'");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    }
}

/// Install the global subscriber: stdout in `config.format`, plus a daily rolling
/// JSON file `<file_prefix or service>.log` under `config.directory`.
///
/// A second call keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = GUARDS.set((file_guard, stdout_guard));

    let filter = build_filter(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    );

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        file_prefix = %prefix,
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}
