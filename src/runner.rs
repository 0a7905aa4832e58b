//! Per-target test orchestration.
//!
//! Runs the enabled test kinds against one target in a fixed order and
//! collects the outcomes into a [`TargetResult`]. Test kinds are
//! independent: a failing DNS lookup never stops the ping or HTTP tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::Config;
use crate::mtu;
use crate::probe::{BandwidthError, NetworkProbe};
use crate::store::{TargetResult, TestOutcome};
use crate::target::Target;

/// Ports scanned when the configured list is empty.
pub const DEFAULT_PORTS: [u16; 9] = [22, 80, 443, 25, 53, 110, 143, 993, 995];

const DISABLED_MSG: &str = "disabled in configuration";

/// Runs every enabled test kind against targets.
pub struct TestRunner<P> {
    probe: Arc<P>,
    config: Arc<Config>,
}

impl<P: NetworkProbe> TestRunner<P> {
    pub fn new(probe: Arc<P>, config: Arc<Config>) -> Self {
        Self { probe, config }
    }

    /// Test one target. Always produces a result; failures are recorded in
    /// the per-kind outcomes, never propagated.
    pub async fn run(&self, target: &Target) -> TargetResult {
        // Spread concurrent runners out a little to avoid a thundering herd
        // on shared infrastructure.
        let jitter = rand::random::<u64>() % 100;
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let enabled = &self.config.tests;
        let timestamp = Utc::now();

        let dns = if enabled.dns {
            self.test_dns(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };
        let ping = if enabled.ping {
            self.test_ping(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };
        let bandwidth = if enabled.bandwidth {
            self.test_bandwidth(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };
        let ports = if enabled.ports {
            self.test_ports(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };
        let mtu = if enabled.mtu {
            self.test_mtu(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };
        let http = if enabled.http {
            self.test_http(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };
        let traceroute = if enabled.traceroute {
            self.test_traceroute(target).await
        } else {
            TestOutcome::disabled(DISABLED_MSG)
        };

        TargetResult {
            target: target.raw().to_string(),
            timestamp,
            dns,
            ping,
            bandwidth,
            ports,
            mtu,
            http,
            traceroute,
        }
    }

    async fn test_dns(&self, target: &Target) -> TestOutcome {
        let timeout = Duration::from_secs_f64(self.config.timeouts.dns);
        match self.probe.resolve(target.hostname(), timeout).await {
            Ok(reply) => TestOutcome::dns_success(
                reply.addresses.iter().map(ToString::to_string).collect(),
                reply.elapsed,
            ),
            Err(e) => TestOutcome::failed(e),
        }
    }

    async fn test_ping(&self, target: &Target) -> TestOutcome {
        let timeout = Duration::from_secs_f64(self.config.timeouts.ping);
        match self
            .probe
            .ping(target.hostname(), self.config.ping_count, timeout)
            .await
        {
            Ok(reply) => TestOutcome::ping_success(reply.elapsed),
            Err(e) => TestOutcome::failed(e),
        }
    }

    async fn test_bandwidth(&self, target: &Target) -> TestOutcome {
        let Some(url) = self.config.bandwidth_url.as_deref() else {
            return TestOutcome::failed(BandwidthError::NoTool(
                "no bandwidth test url configured".to_string(),
            ));
        };
        let timeout = Duration::from_secs_f64(self.config.timeouts.bandwidth);
        match self
            .probe
            .measure_bandwidth(url, timeout, self.config.bandwidth_upload)
            .await
        {
            Ok(reply) => {
                tracing::debug!(
                    "bandwidth for {}: {:.1} Mbit/s down",
                    target.raw(),
                    reply.download_mbps
                );
                TestOutcome::bandwidth_success(reply.download_mbps, reply.upload_mbps)
            }
            Err(e) => TestOutcome::failed(e),
        }
    }

    async fn test_ports(&self, target: &Target) -> TestOutcome {
        let configured = self.config.ports.trim();
        let ports: Vec<u16> = if configured.is_empty() {
            DEFAULT_PORTS.to_vec()
        } else {
            let parsed = parse_port_list(configured);
            if parsed.is_empty() {
                return TestOutcome::disabled("port list contained no valid ports");
            }
            parsed
        };

        let timeout = Duration::from_secs_f64(self.config.timeouts.tcp);
        let mut open = Vec::new();
        for &port in &ports {
            match self.probe.connect_tcp(target.hostname(), port, timeout).await {
                Ok(true) => open.push(port),
                Ok(false) => {}
                // No capability to test any port at all.
                Err(e) => return TestOutcome::failed(e),
            }
        }
        if open.is_empty() {
            return TestOutcome::failed(format!("none of {} scanned ports open", ports.len()));
        }
        TestOutcome::ports_success(open)
    }

    async fn test_mtu(&self, target: &Target) -> TestOutcome {
        let range = self.config.mtu;
        let timeout = Duration::from_secs_f64(self.config.timeouts.mtu_probe);
        match mtu::discover_path_mtu(
            self.probe.as_ref(),
            target.hostname(),
            range.min,
            range.max,
            range.step,
            timeout,
        )
        .await
        {
            Ok(report) => {
                tracing::debug!(
                    "path MTU to {}: {} after {} probes",
                    target.hostname(),
                    report.discovered_mtu,
                    report.probes
                );
                TestOutcome::mtu_success(report.discovered_mtu)
            }
            Err(e) => TestOutcome::failed(e),
        }
    }

    async fn test_http(&self, target: &Target) -> TestOutcome {
        let timeout = Duration::from_secs_f64(self.config.timeouts.http);
        match self
            .probe
            .fetch_http(target.http_url(), timeout, &self.config.http_user_agent)
            .await
        {
            Ok(reply) => TestOutcome::http_success(reply.status, reply.elapsed),
            Err(e) => TestOutcome::failed(e),
        }
    }

    async fn test_traceroute(&self, target: &Target) -> TestOutcome {
        let timeout = Duration::from_secs_f64(self.config.timeouts.traceroute);
        match self
            .probe
            .traceroute(target.hostname(), self.config.traceroute_max_hops, timeout)
            .await
        {
            Ok(reply) => {
                if let Err(e) =
                    write_trace_capture(&self.config.results_dir, target.hostname(), &reply.raw_output)
                {
                    tracing::warn!(
                        "could not write traceroute capture for {}: {e}",
                        target.hostname()
                    );
                }
                TestOutcome::traceroute_success(reply.hops, reply.last_hop)
            }
            Err(e) => TestOutcome::failed(e),
        }
    }
}

/// Persist raw traceroute output next to the result documents.
fn write_trace_capture(dir: &Path, hostname: &str, raw: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!(
        "traceroute-{hostname}-{}.txt",
        Utc::now().format("%Y%m%d-%H%M%S")
    ));
    std::fs::write(&path, raw)?;
    Ok(path)
}

/// Parse a comma-separated port list, dropping invalid tokens with a
/// warning. Zero is not a scannable port.
pub fn parse_port_list(list: &str) -> Vec<u16> {
    list.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<u16>() {
            Ok(port) if port >= 1 => Some(port),
            _ => {
                tracing::warn!("ignoring invalid port {token:?}");
                None
            }
        })
        .collect()
}
