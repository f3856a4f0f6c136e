//! ---
//! hma_section: "01-core-functionality"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Shared primitives and utilities for the controller runtime."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
//! Shared primitives for the HM-Auto workspace.
//! This crate exposes configuration loading, logging setup and the
//! duration helpers consumed across the workspace.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AlertConfig, AppConfig, BackoffConfig, BusConfig, HttpConfig, InternetCheckConfig,
    LoadedAppConfig, LoggingConfig, MetricsConfig, ProbeKind, StoreBackend, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use time::{duration_to_millis, parse_duration, parse_duration_or};
