//! Network probe capability layer.
//!
//! `NetworkProbe` is the seam between test orchestration and the network:
//! the native implementation backs it with sockets, reqwest, and external
//! tools, and tests back it with a mock. Every operation takes a
//! caller-supplied timeout; nothing here blocks unboundedly.

pub mod bandwidth;
pub mod dns;
pub mod http;
#[cfg(test)]
pub mod mock;
pub mod ping;
pub mod tcp;
pub mod traceroute;

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

/// DNS probe error types.
#[derive(Error, Debug, Clone)]
pub enum DnsError {
    #[error("no address records: {0}")]
    NoRecords(String),
    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),
    #[error("resolver unavailable: {0}")]
    ToolUnavailable(String),
}

/// Ping probe error types.
#[derive(Error, Debug, Clone)]
pub enum PingError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("ping timed out after {0:?}")]
    Timeout(Duration),
}

/// HTTP probe error types.
#[derive(Error, Debug, Clone)]
pub enum HttpError {
    #[error("could not resolve host: {0}")]
    Resolve(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty reply from server")]
    EmptyReply,
    #[error("server returned HTTP {0}")]
    Other(u16),
}

/// Bandwidth probe error types.
#[derive(Error, Debug, Clone)]
pub enum BandwidthError {
    #[error("no bandwidth transfer capability: {0}")]
    NoTool(String),
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

/// Traceroute probe error types.
#[derive(Error, Debug, Clone)]
pub enum TracerouteError {
    #[error("traceroute timed out after {0:?}")]
    Timeout(Duration),
    #[error("traceroute failed: {0}")]
    Failed(String),
}

/// Port scan error types. Per-port connect failures are not errors; this
/// only covers a backend with no TCP capability at all.
#[derive(Error, Debug, Clone)]
pub enum PortScanError {
    #[error("no tool available to test ports: {0}")]
    NoToolAvailable(String),
}

/// Successful DNS resolution.
#[derive(Debug, Clone)]
pub struct DnsReply {
    pub addresses: Vec<IpAddr>,
    pub elapsed: Duration,
}

/// Successful ping, averaged over the requested echo count.
#[derive(Debug, Clone, Copy)]
pub struct PingReply {
    pub elapsed: Duration,
}

/// Successful HTTP fetch.
#[derive(Debug, Clone, Copy)]
pub struct HttpReply {
    pub status: u16,
    pub elapsed: Duration,
}

/// Measured transfer throughput.
#[derive(Debug, Clone, Copy)]
pub struct BandwidthReply {
    pub download_mbps: f64,
    pub upload_mbps: Option<f64>,
}

/// Completed hop trace.
#[derive(Debug, Clone)]
pub struct TracerouteReply {
    pub hops: u32,
    pub last_hop: String,
    pub raw_output: String,
}

/// Capability interface over the primitive network operations the test
/// runner needs. Implemented natively by [`NativeProbe`] and by a mock in
/// tests.
#[allow(async_fn_in_trait)]
pub trait NetworkProbe: Send + Sync {
    async fn resolve(&self, hostname: &str, timeout: Duration) -> Result<DnsReply, DnsError>;

    async fn ping(
        &self,
        hostname: &str,
        count: u32,
        timeout: Duration,
    ) -> Result<PingReply, PingError>;

    /// Don't-fragment echo used by MTU discovery. Any failure is `false`.
    async fn ping_with_size(
        &self,
        hostname: &str,
        payload_bytes: usize,
        dont_fragment: bool,
        timeout: Duration,
    ) -> bool;

    /// TCP connect check. Closed, filtered, and timed-out ports are
    /// `Ok(false)`, not errors.
    async fn connect_tcp(
        &self,
        hostname: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<bool, PortScanError>;

    async fn fetch_http(
        &self,
        url: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<HttpReply, HttpError>;

    async fn measure_bandwidth(
        &self,
        url: &str,
        timeout: Duration,
        test_upload: bool,
    ) -> Result<BandwidthReply, BandwidthError>;

    async fn traceroute(
        &self,
        hostname: &str,
        max_hops: u32,
        timeout: Duration,
    ) -> Result<TracerouteReply, TracerouteError>;
}

/// Production probe backed by sockets, reqwest, and external tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeProbe;

impl NativeProbe {
    pub fn new() -> Self {
        Self
    }
}

impl NetworkProbe for NativeProbe {
    async fn resolve(&self, hostname: &str, timeout: Duration) -> Result<DnsReply, DnsError> {
        dns::resolve(hostname, timeout).await
    }

    async fn ping(
        &self,
        hostname: &str,
        count: u32,
        timeout: Duration,
    ) -> Result<PingReply, PingError> {
        ping::ping(hostname, count, timeout).await
    }

    async fn ping_with_size(
        &self,
        hostname: &str,
        payload_bytes: usize,
        dont_fragment: bool,
        timeout: Duration,
    ) -> bool {
        ping::ping_with_size(hostname, payload_bytes, dont_fragment, timeout).await
    }

    async fn connect_tcp(
        &self,
        hostname: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<bool, PortScanError> {
        tcp::connect_tcp(hostname, port, timeout).await
    }

    async fn fetch_http(
        &self,
        url: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<HttpReply, HttpError> {
        http::fetch_http(url, timeout, user_agent).await
    }

    async fn measure_bandwidth(
        &self,
        url: &str,
        timeout: Duration,
        test_upload: bool,
    ) -> Result<BandwidthReply, BandwidthError> {
        bandwidth::measure_bandwidth(url, timeout, test_upload).await
    }

    async fn traceroute(
        &self,
        hostname: &str,
        max_hops: u32,
        timeout: Duration,
    ) -> Result<TracerouteReply, TracerouteError> {
        traceroute::traceroute(hostname, max_hops, timeout).await
    }
}
