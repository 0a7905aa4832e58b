//! ICMP ping probe with native sockets and a command fallback.
//!
//! Native echoes run on blocking sockets inside spawn_blocking for
//! sub-millisecond timing. Hosts without raw/dgram ICMP capability fall
//! back to the system `ping` tool. Don't-fragment probes (MTU discovery)
//! always go through the tool, which carries the DF plumbing on every
//! platform we target.

use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{PingError, PingReply};
use crate::target::ensure_probe_safe;

/// ICMP capability state, detected once per process.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static ECHO_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Unique (identifier, sequence) per echo so concurrent pings to the same
/// destination can tell their replies apart.
fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = ECHO_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping: using native ICMP (raw socket)");
        return IcmpCapability::Native;
    }
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping: using native ICMP (dgram socket, unprivileged)");
        return IcmpCapability::Native;
    }
    tracing::info!("ping: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// Ping a host `count` times and return the average round-trip time.
pub async fn ping(hostname: &str, count: u32, timeout: Duration) -> Result<PingReply, PingError> {
    // The fallback path spawns a tool, so the input is re-checked here even
    // though validated targets are the only callers.
    ensure_probe_safe(hostname).map_err(|e| PingError::Unreachable(e.to_string()))?;

    let count = count.max(1);
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

    if capability == IcmpCapability::Native {
        let ip = resolve_target(hostname).await?;
        let mut total = Duration::ZERO;
        for _ in 0..count {
            let reply = tokio::task::spawn_blocking(move || echo_once(ip, timeout))
                .await
                .map_err(|e| PingError::Unreachable(format!("echo task failed: {e}")))?;
            match reply {
                Ok(rtt) => total += rtt,
                Err(EchoError::Timeout) => return Err(PingError::Timeout(timeout)),
                Err(EchoError::Permission(reason)) => {
                    tracing::warn!(
                        "native ping denied for {hostname}, falling back to command: {reason}"
                    );
                    return ping_command(hostname, count, timeout).await;
                }
                Err(EchoError::Socket(reason)) => return Err(PingError::Unreachable(reason)),
            }
        }
        return Ok(PingReply {
            elapsed: total / count,
        });
    }

    ping_command(hostname, count, timeout).await
}

/// Single don't-fragment echo with an exact payload size.
///
/// Returns whether the probe came back without fragmentation; every failure
/// mode is `false`.
pub async fn ping_with_size(
    hostname: &str,
    payload_bytes: usize,
    dont_fragment: bool,
    timeout: Duration,
) -> bool {
    if ensure_probe_safe(hostname).is_err() {
        return false;
    }

    let wait_secs = timeout.as_secs().max(1).to_string();
    let mut args: Vec<String> = vec![
        "-c".into(),
        "1".into(),
        "-W".into(),
        wait_secs,
        "-s".into(),
        payload_bytes.to_string(),
    ];
    if dont_fragment {
        args.push("-M".into());
        args.push("do".into());
    }
    args.push(hostname.to_string());

    match Command::new("ping")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(e) => {
            tracing::debug!("don't-fragment probe could not run for {hostname}: {e}");
            false
        }
    }
}

async fn resolve_target(hostname: &str) -> Result<IpAddr, PingError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((hostname, 0u16))
        .await
        .map_err(|e| PingError::Unreachable(format!("resolution failed: {e}")))?;
    addrs
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| PingError::Unreachable(format!("no addresses found for {hostname}")))
}

enum EchoError {
    Timeout,
    Permission(String),
    Socket(String),
}

/// One blocking echo round-trip with precise timing. Runs under
/// spawn_blocking.
fn echo_once(ip: IpAddr, timeout: Duration) -> Result<Duration, EchoError> {
    let (domain, protocol, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, 0u8),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, 129u8),
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                EchoError::Permission(e.to_string())
            } else {
                EchoError::Socket(format!("failed to create ICMP socket: {e}"))
            }
        })?;

    socket
        .set_read_timeout(Some(timeout))
        .and_then(|()| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| EchoError::Socket(format!("failed to set timeout: {e}")))?;

    let dest = SocketAddr::new(ip, 0);
    socket
        .connect(&dest.into())
        .map_err(|e| EchoError::Socket(format!("failed to connect: {e}")))?;

    let (identifier, sequence) = next_echo_id();
    let packet = build_echo_request(ip, identifier, sequence);

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            EchoError::Permission(e.to_string())
        } else {
            EchoError::Socket(format!("failed to send: {e}"))
        }
    })?;

    // Keep reading until our reply shows up or the timeout runs out; the
    // socket can surface unrelated ICMP traffic first.
    loop {
        let mut buf: [MaybeUninit<u8>; 1500] = [MaybeUninit::uninit(); 1500];
        let len = socket.recv(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut
            {
                EchoError::Timeout
            } else {
                EchoError::Socket(format!("failed to receive: {e}"))
            }
        })?;
        // SAFETY: recv initialized `len` bytes.
        let buf: &[u8] = unsafe { std::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), len) };

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(EchoError::Timeout);
        }

        // Raw IPv4 sockets hand us the IP header too; dgram sockets and
        // ICMPv6 do not.
        let offset = if matches!(ip, IpAddr::V4(_)) && len > 0 && buf[0] >> 4 == 4 {
            20
        } else {
            0
        };
        if len >= offset + 8 {
            let got_type = buf[offset];
            let got_id = u16::from_be_bytes([buf[offset + 4], buf[offset + 5]]);
            let got_seq = u16::from_be_bytes([buf[offset + 6], buf[offset + 7]]);
            if got_type == reply_type && got_id == identifier && got_seq == sequence {
                return Ok(elapsed);
            }
        }
        // Not ours; keep waiting.
    }
}

/// Build an echo request: type 8 for IPv4, type 128 for ICMPv6, 56-byte
/// payload carrying a send timestamp.
fn build_echo_request(ip: IpAddr, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = match ip {
        IpAddr::V4(_) => 8,
        IpAddr::V6(_) => 128,
    };
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    // The kernel fills in the ICMPv6 checksum; IPv4 is on us.
    if matches!(ip, IpAddr::V4(_)) {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u32::from(u16::from_be_bytes([pair[0], pair[1]]));
    }
    if let Some(&last) = chunks.remainder().first() {
        sum += u32::from(last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Ping via the system tool.
async fn ping_command(
    hostname: &str,
    count: u32,
    timeout: Duration,
) -> Result<PingReply, PingError> {
    let wait_secs = timeout.as_secs().max(1).to_string();
    let output = Command::new("ping")
        .args(["-c", &count.to_string(), "-W", &wait_secs, hostname])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PingError::Unreachable(format!("failed to run ping: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(PingError::Timeout(timeout));
        }
        return Err(PingError::Unreachable(format!(
            "ping failed: {}",
            if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() }
        )));
    }

    parse_ping_output(&stdout)
        .map(|avg_ms| PingReply {
            elapsed: Duration::from_secs_f64(avg_ms / 1000.0),
        })
        .ok_or_else(|| PingError::Unreachable(format!("could not parse ping output: {stdout}")))
}

/// Extract the average round-trip time in milliseconds from `ping` output.
///
/// Prefers the summary line (covers the whole echo series), falling back to
/// a per-packet time for tools that print no summary.
fn parse_ping_output(output: &str) -> Option<f64> {
    // "rtt min/avg/max/mdev = 12.3/13.1/14.0/0.4 ms" (Linux)
    static SUMMARY_LINUX: OnceLock<Regex> = OnceLock::new();
    let re = SUMMARY_LINUX.get_or_init(|| {
        Regex::new(r"rtt\s+min/avg/max/mdev\s*=\s*[0-9.]+/([0-9.]+)/").unwrap()
    });
    if let Some(caps) = re.captures(output) {
        if let Ok(ms) = caps[1].parse::<f64>() {
            return Some(ms);
        }
    }

    // "round-trip min/avg/max/stddev = ..." (macOS/BSD)
    static SUMMARY_BSD: OnceLock<Regex> = OnceLock::new();
    let re = SUMMARY_BSD.get_or_init(|| {
        Regex::new(r"round-trip\s+min/avg/max/stddev\s*=\s*[0-9.]+/([0-9.]+)/").unwrap()
    });
    if let Some(caps) = re.captures(output) {
        if let Ok(ms) = caps[1].parse::<f64>() {
            return Some(ms);
        }
    }

    // Per-packet "time=12.3 ms"
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let re = PER_PACKET.get_or_init(|| Regex::new(r"time[=<]([0-9.]+)\s*ms").unwrap());
    if let Some(caps) = re.captures(output) {
        if let Ok(ms) = caps[1].parse::<f64>() {
            return Some(ms);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icmp_checksum_nonzero() {
        let mut packet = vec![0u8; 8];
        packet[0] = 8;
        packet[4] = 0x12;
        packet[5] = 0x34;
        packet[7] = 0x01;
        assert_ne!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_checksum_verifies_to_zero() {
        // A packet with its own checksum folded in sums to zero.
        let packet = build_echo_request("127.0.0.1".parse().unwrap(), 0x4242, 7);
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_request_v4() {
        let packet = build_echo_request("127.0.0.1".parse().unwrap(), 0x1234, 0x0001);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &[0x12, 0x34]);
        assert_eq!(&packet[6..8], &[0x00, 0x01]);
    }

    #[test]
    fn test_build_echo_request_v6_leaves_checksum_to_kernel() {
        let packet = build_echo_request("::1".parse().unwrap(), 0xABCD, 2);
        assert_eq!(packet[0], 128);
        assert_eq!(&packet[2..4], &[0, 0]);
    }

    #[test]
    fn test_parse_ping_output_prefers_summary() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=11.0 ms
64 bytes from 8.8.8.8: icmp_seq=2 ttl=117 time=13.0 ms

--- 8.8.8.8 ping statistics ---
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
rtt min/avg/max/mdev = 11.000/12.000/13.000/1.000 ms"#;
        assert_eq!(parse_ping_output(output), Some(12.0));
    }

    #[test]
    fn test_parse_ping_output_bsd_summary() {
        let output = r#"--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/18.221/18.536/0.315 ms"#;
        assert_eq!(parse_ping_output(output), Some(18.221));
    }

    #[test]
    fn test_parse_ping_output_per_packet_fallback() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        assert_eq!(parse_ping_output(output), Some(12.345));
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert_eq!(parse_ping_output("no timing here"), None);
    }

    #[tokio::test]
    async fn test_ping_with_size_rejects_suspicious_hostname() {
        assert!(!ping_with_size("host; reboot", 1472, true, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_ping_rejects_suspicious_hostname() {
        let result = ping("`uname`", 1, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(PingError::Unreachable(_))));
    }
}
