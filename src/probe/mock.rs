//! Table-driven mock probe for tests.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{
    BandwidthError, BandwidthReply, DnsError, DnsReply, HttpError, HttpReply, NetworkProbe,
    PingError, PingReply, PortScanError, TracerouteError, TracerouteReply,
};

/// Configurable fake probe. Defaults describe a healthy, reachable target;
/// flip fields to simulate failures. Records which operations ran so tests
/// can assert disabled kinds never probe.
pub struct MockProbe {
    pub dns_ok: bool,
    pub dns_addresses: Vec<IpAddr>,
    pub ping_ok: bool,
    /// `Some(code)` answers with that status; `None` fails the connection.
    pub http_status: Option<u16>,
    pub open_ports: Vec<u16>,
    pub tcp_unavailable: bool,
    /// `Some((down, up))` succeeds; `None` fails the transfer.
    pub bandwidth: Option<(f64, Option<f64>)>,
    /// `Some(hops)` succeeds; `None` fails the trace.
    pub traceroute_hops: Option<u32>,
    /// Don't-fragment probes succeed while `payload + 28 <= path_mtu`.
    pub path_mtu: Option<u16>,
    pub calls: Mutex<Vec<&'static str>>,
    pub df_probes: AtomicU32,
}

impl Default for MockProbe {
    fn default() -> Self {
        Self {
            dns_ok: true,
            dns_addresses: vec!["93.184.216.34".parse().unwrap()],
            ping_ok: true,
            http_status: Some(200),
            open_ports: vec![80, 443],
            tcp_unavailable: false,
            bandwidth: Some((94.2, None)),
            traceroute_hops: Some(12),
            path_mtu: Some(1500),
            calls: Mutex::new(Vec::new()),
            df_probes: AtomicU32::new(0),
        }
    }
}

impl MockProbe {
    /// A probe where every operation fails.
    pub fn unreachable() -> Self {
        Self {
            dns_ok: false,
            ping_ok: false,
            http_status: None,
            open_ports: Vec::new(),
            bandwidth: None,
            traceroute_hops: None,
            path_mtu: None,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str) {
        self.calls.lock().unwrap().push(op);
    }
}

impl NetworkProbe for MockProbe {
    async fn resolve(&self, hostname: &str, _timeout: Duration) -> Result<DnsReply, DnsError> {
        self.record("resolve");
        if self.dns_ok {
            Ok(DnsReply {
                addresses: self.dns_addresses.clone(),
                elapsed: Duration::from_millis(3),
            })
        } else {
            Err(DnsError::NoRecords(hostname.to_string()))
        }
    }

    async fn ping(
        &self,
        hostname: &str,
        _count: u32,
        _timeout: Duration,
    ) -> Result<PingReply, PingError> {
        self.record("ping");
        if self.ping_ok {
            Ok(PingReply {
                elapsed: Duration::from_millis(12),
            })
        } else {
            Err(PingError::Unreachable(format!("{hostname} did not answer")))
        }
    }

    async fn ping_with_size(
        &self,
        _hostname: &str,
        payload_bytes: usize,
        dont_fragment: bool,
        _timeout: Duration,
    ) -> bool {
        self.record("ping_with_size");
        self.df_probes.fetch_add(1, Ordering::Relaxed);
        assert!(dont_fragment, "MTU discovery must set don't-fragment");
        match self.path_mtu {
            Some(path_mtu) => payload_bytes + 28 <= usize::from(path_mtu),
            None => false,
        }
    }

    async fn connect_tcp(
        &self,
        _hostname: &str,
        port: u16,
        _timeout: Duration,
    ) -> Result<bool, PortScanError> {
        self.record("connect_tcp");
        if self.tcp_unavailable {
            return Err(PortScanError::NoToolAvailable(
                "mock backend has no TCP support".to_string(),
            ));
        }
        Ok(self.open_ports.contains(&port))
    }

    async fn fetch_http(
        &self,
        _url: &str,
        _timeout: Duration,
        _user_agent: &str,
    ) -> Result<HttpReply, HttpError> {
        self.record("fetch_http");
        match self.http_status {
            Some(code) if code < 400 => Ok(HttpReply {
                status: code,
                elapsed: Duration::from_millis(80),
            }),
            Some(code) => Err(HttpError::Other(code)),
            None => Err(HttpError::Connect("mock connection refused".to_string())),
        }
    }

    async fn measure_bandwidth(
        &self,
        _url: &str,
        _timeout: Duration,
        test_upload: bool,
    ) -> Result<BandwidthReply, BandwidthError> {
        self.record("measure_bandwidth");
        match self.bandwidth {
            Some((download_mbps, upload_mbps)) => Ok(BandwidthReply {
                download_mbps,
                upload_mbps: if test_upload { upload_mbps } else { None },
            }),
            None => Err(BandwidthError::TransferFailed(
                "mock transfer failed".to_string(),
            )),
        }
    }

    async fn traceroute(
        &self,
        hostname: &str,
        _max_hops: u32,
        _timeout: Duration,
    ) -> Result<TracerouteReply, TracerouteError> {
        self.record("traceroute");
        match self.traceroute_hops {
            Some(hops) => Ok(TracerouteReply {
                hops,
                last_hop: "93.184.216.34".to_string(),
                raw_output: format!("traceroute to {hostname}\n 1  93.184.216.34  1.0 ms\n"),
            }),
            None => Err(TracerouteError::Failed("mock trace failed".to_string())),
        }
    }
}
