//! ---
//! hma_section: "07-resilience-fault-tolerance"
//! hma_subsection: "module"
//! hma_type: "source"
//! hma_scope: "code"
//! hma_description: "Connectivity watchdog and remediation."
//! hma_version: "v0.0.0-prealpha"
//! hma_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmauto_common::{InternetCheckConfig, ProbeKind};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Single reachability check against a network address.
///
/// Implementations bound their own latency and never retry; an unreachable,
/// timed out or unresolvable target is simply `false`.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Whether `address` answered within the prober's timeout.
    async fn probe(&self, address: &str) -> bool;
}

/// ICMP echo through the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProber {
    timeout: Duration,
}

impl PingProber {
    /// Prober waiting at most `timeout` for the echo reply.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str) -> bool {
        let wait_secs = self.timeout.as_secs().max(1).to_string();
        let mut command = Command::new("ping");
        command
            .args(["-c", "1", "-W", wait_secs.as_str(), address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // ping enforces -W itself; the outer bound covers resolver stalls.
        let deadline = self.timeout + Duration::from_secs(1);
        match timeout(deadline, command.status()).await {
            Ok(Ok(status)) => {
                debug!(address, success = status.success(), "ping finished");
                status.success()
            }
            Ok(Err(err)) => {
                warn!(address, error = %err, "unable to run ping");
                false
            }
            Err(_) => {
                debug!(address, "ping timed out");
                false
            }
        }
    }
}

/// TCP connect probe, for hosts where raw ICMP is unavailable.
#[derive(Debug, Clone)]
pub struct TcpProber {
    port: u16,
    timeout: Duration,
}

impl TcpProber {
    /// Connect to `port` unless the probed address carries its own.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    fn target(&self, address: &str) -> String {
        if address.parse::<SocketAddr>().is_ok() {
            address.to_owned()
        } else {
            format!("{address}:{}", self.port)
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str) -> bool {
        let target = self.target(address);
        match timeout(self.timeout, TcpStream::connect(&target)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(err)) => {
                debug!(target = %target, error = %err, "tcp probe refused");
                false
            }
            Err(_) => {
                debug!(target = %target, "tcp probe timed out");
                false
            }
        }
    }
}

/// Prober selected by `internet_check.probe`.
pub fn build_prober(config: &InternetCheckConfig) -> Arc<dyn Prober> {
    let probe_timeout = config.effective_probe_timeout();
    match config.probe {
        ProbeKind::Icmp => Arc::new(PingProber::new(probe_timeout)),
        ProbeKind::Tcp => Arc::new(TcpProber::new(config.tcp_port, probe_timeout)),
    }
}
