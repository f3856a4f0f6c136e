//! ---
//! hma_section: "01-core-functionality"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Shared primitives and utilities for the controller runtime."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::time::parse_duration_or;

/// Fallback tick period used when `internet_check.interval` is unusable.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(120);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

fn default_http_enabled() -> bool {
    true
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

fn default_store_path() -> PathBuf {
    PathBuf::from("target/state/hmstt_states.json")
}

fn default_state_channel() -> String {
    "hmstt_channel".to_owned()
}

fn default_alert_channel() -> String {
    "hmalert_channel".to_owned()
}

fn default_bus_capacity() -> usize {
    256
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_alert_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_check_enabled() -> bool {
    true
}

fn default_check_interval() -> String {
    "2m".to_owned()
}

fn default_check_address() -> String {
    "1.1.1.1".to_owned()
}

fn default_modem_address() -> String {
    "10.10.10.1".to_owned()
}

fn default_switch_key() -> String {
    "server_1".to_owned()
}

fn default_probe_timeout() -> String {
    "2s".to_owned()
}

fn default_tcp_port() -> u16 {
    53
}

fn default_settle() -> String {
    "500ms".to_owned()
}

fn default_initial_interval() -> String {
    "30s".to_owned()
}

fn default_max_interval() -> String {
    "10m".to_owned()
}

fn default_max_elapsed() -> String {
    "0s".to_owned()
}

fn default_multiplier() -> f64 {
    3.0
}

fn default_randomization() -> f64 {
    0.3
}

/// Primary configuration object for the HM-Auto runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub internet_check: InternetCheckConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HMAUTO_CONFIG";

    /// Load configuration from disk, respecting the `HMAUTO_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// An explicit `HMAUTO_CONFIG` path wins over every candidate; the remaining
    /// candidates are probed in order and the first existing file is used.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Load and validate a single file, ignoring `HMAUTO_CONFIG`.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    /// Validate invariants that cannot be repaired with a default.
    pub fn validate(&self) -> Result<()> {
        if self.bus.capacity == 0 {
            return Err(anyhow!("bus.capacity must be greater than zero"));
        }
        if self.bus.channel.trim().is_empty() || self.bus.alert_channel.trim().is_empty() {
            return Err(anyhow!("bus channels must not be empty"));
        }
        if matches!(self.store.backend, StoreBackend::File)
            && self.store.path.as_os_str().is_empty()
        {
            return Err(anyhow!("store.path is required for the file backend"));
        }
        self.internet_check.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            listen: default_http_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Storage engine backing the state store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Routing prefix for state change events.
    #[serde(default = "default_state_channel")]
    pub channel: String,
    /// Routing prefix for alert events.
    #[serde(default = "default_alert_channel")]
    pub alert_channel: String,
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
    #[serde(default = "default_publish_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub publish_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel: default_state_channel(),
            alert_channel: default_alert_channel(),
            capacity: default_bus_capacity(),
            publish_timeout: default_publish_timeout(),
        }
    }
}

/// Discord webhook targets, one per alert level.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub info_webhook: Option<String>,
    #[serde(default)]
    pub warning_webhook: Option<String>,
    #[serde(default)]
    pub error_webhook: Option<String>,
    #[serde(default = "default_alert_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            info_webhook: None,
            warning_webhook: None,
            error_webhook: None,
            request_timeout: default_alert_timeout(),
        }
    }
}

/// Reachability check flavour used by the prober.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Icmp,
    Tcp,
}

/// Watchdog settings. Durations stay raw strings so that a typo degrades to the
/// documented default instead of aborting startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternetCheckConfig {
    #[serde(default = "default_check_enabled")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    pub interval: String,
    #[serde(default = "default_check_address")]
    pub check_address: String,
    #[serde(default = "default_modem_address")]
    pub modem_address: String,
    #[serde(default = "default_switch_key")]
    pub switch_key: String,
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default = "default_settle")]
    pub settle: String,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for InternetCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_check_enabled(),
            interval: default_check_interval(),
            check_address: default_check_address(),
            modem_address: default_modem_address(),
            switch_key: default_switch_key(),
            probe: ProbeKind::default(),
            probe_timeout: default_probe_timeout(),
            tcp_port: default_tcp_port(),
            settle: default_settle(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl InternetCheckConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for (field, value) in [
            ("internet_check.check_address", &self.check_address),
            ("internet_check.modem_address", &self.modem_address),
            ("internet_check.switch_key", &self.switch_key),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow!("{field} must not be empty"));
            }
        }
        Ok(())
    }

    /// Tick period, falling back to two minutes when unparsable.
    pub fn effective_interval(&self) -> Duration {
        parse_duration_or(
            "internet_check.interval",
            &self.interval,
            DEFAULT_CHECK_INTERVAL,
        )
    }

    pub fn effective_probe_timeout(&self) -> Duration {
        parse_duration_or(
            "internet_check.probe_timeout",
            &self.probe_timeout,
            DEFAULT_PROBE_TIMEOUT,
        )
    }

    pub fn effective_settle(&self) -> Duration {
        parse_duration_or("internet_check.settle", &self.settle, DEFAULT_SETTLE)
    }
}

/// Raw exponential backoff parameters. Normalised by the monitor crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_initial_interval")]
    pub initial_interval: String,
    #[serde(default = "default_max_interval")]
    pub max_interval: String,
    /// `0s` keeps retrying forever.
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_time: String,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_randomization")]
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            max_elapsed_time: default_max_elapsed(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.bus.channel, "hmstt_channel");
        assert_eq!(config.bus.publish_timeout, Duration::from_secs(5));
        assert_eq!(config.internet_check.switch_key, "server_1");
        assert_eq!(
            config.internet_check.effective_interval(),
            Duration::from_secs(120)
        );
        assert_eq!(config.internet_check.backoff.multiplier, 3.0);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn invalid_interval_falls_back_without_failing() {
        let config: AppConfig = r#"
            [internet_check]
            interval = "every now and then"
            settle = "250ms"
            probe = "tcp"
        "#
        .parse()
        .unwrap();
        assert_eq!(
            config.internet_check.effective_interval(),
            DEFAULT_CHECK_INTERVAL
        );
        assert_eq!(
            config.internet_check.effective_settle(),
            Duration::from_millis(250)
        );
        assert_eq!(config.internet_check.probe, ProbeKind::Tcp);
    }

    #[test]
    fn empty_switch_key_is_rejected() {
        let result = r#"
            [internet_check]
            switch_key = " "
        "#
        .parse::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn load_with_source_picks_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("hmauto.toml");
        std::fs::write(&present, "[http]\nenabled = false\n").unwrap();

        let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
        assert_eq!(loaded.source, present);
        assert!(!loaded.config.http.enabled);
    }

    #[test]
    fn shipped_sample_config_parses() {
        let config: AppConfig = include_str!("../../../conf/hmauto.toml").parse().unwrap();
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.bus.publish_timeout, Duration::from_secs(5));
        assert_eq!(
            config.internet_check.effective_interval(),
            Duration::from_secs(120)
        );
        assert!(config.alert.info_webhook.is_none());
    }
}
