//! Hop trace probe via the system `traceroute` tool.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use super::{TracerouteError, TracerouteReply};
use crate::target::ensure_probe_safe;

/// Per-hop reply wait passed to the tool, in seconds.
const HOP_WAIT_SECS: u32 = 2;

/// Trace the route to a host, keeping the full tool output.
pub async fn traceroute(
    hostname: &str,
    max_hops: u32,
    timeout: Duration,
) -> Result<TracerouteReply, TracerouteError> {
    ensure_probe_safe(hostname).map_err(|e| TracerouteError::Failed(e.to_string()))?;

    let run = Command::new("traceroute")
        .args([
            "-m",
            &max_hops.to_string(),
            "-w",
            &HOP_WAIT_SECS.to_string(),
            hostname,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| TracerouteError::Timeout(timeout))?
        .map_err(|e| TracerouteError::Failed(format!("failed to run traceroute: {e}")))?;

    let raw_output = String::from_utf8_lossy(&output.stdout).into_owned();

    if !output.status.success() && raw_output.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TracerouteError::Failed(stderr.trim().to_string()));
    }

    let (hops, last_hop) = parse_trace_output(&raw_output)
        .ok_or_else(|| TracerouteError::Failed("no hops in traceroute output".to_string()))?;

    Ok(TracerouteReply {
        hops,
        last_hop,
        raw_output,
    })
}

/// Count hop lines and pull the last responding hop out of tool output.
///
/// Hop lines start with the hop number; a hop may answer with `*` only, in
/// which case the last hop that actually named a host wins.
fn parse_trace_output(raw: &str) -> Option<(u32, String)> {
    static HOP_RE: OnceLock<Regex> = OnceLock::new();
    let re = HOP_RE.get_or_init(|| Regex::new(r"^\s*(\d+)\s+(\S+)").unwrap());

    let mut hops = 0u32;
    let mut last_hop: Option<String> = None;
    for line in raw.lines() {
        if let Some(caps) = re.captures(line) {
            hops += 1;
            let node = &caps[2];
            if node != "*" {
                last_hop = Some(node.to_string());
            }
        }
    }

    if hops == 0 {
        return None;
    }
    Some((hops, last_hop.unwrap_or_else(|| "*".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"traceroute to example.com (93.184.216.34), 30 hops max, 60 byte packets
 1  gateway (192.168.1.1)  0.512 ms  0.489 ms  0.461 ms
 2  10.11.0.1 (10.11.0.1)  8.123 ms  8.001 ms  7.950 ms
 3  * * *
 4  93.184.216.34 (93.184.216.34)  17.106 ms  17.003 ms  16.982 ms"#;

    #[test]
    fn test_parse_trace_output() {
        let (hops, last_hop) = parse_trace_output(SAMPLE).unwrap();
        assert_eq!(hops, 4);
        assert_eq!(last_hop, "93.184.216.34");
    }

    #[test]
    fn test_parse_trace_output_trailing_silent_hops() {
        let raw = " 1  gateway (192.168.1.1)  0.5 ms\n 2  * * *\n 3  * * *\n";
        let (hops, last_hop) = parse_trace_output(raw).unwrap();
        assert_eq!(hops, 3);
        assert_eq!(last_hop, "gateway");
    }

    #[test]
    fn test_parse_trace_output_empty() {
        assert!(parse_trace_output("").is_none());
        assert!(parse_trace_output("traceroute to x, 30 hops max\n").is_none());
    }

    #[tokio::test]
    async fn test_traceroute_rejects_suspicious_hostname() {
        let result = traceroute("example.com; id", 5, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TracerouteError::Failed(_))));
    }
}
