//! DNS resolution probe using the system resolver.

use std::net::{IpAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use super::{DnsError, DnsReply};

/// Resolve a hostname to its addresses, timing the lookup.
///
/// The blocking resolver call runs on the blocking pool; the timeout wraps
/// the whole lookup.
pub async fn resolve(hostname: &str, timeout: Duration) -> Result<DnsReply, DnsError> {
    let start = Instant::now();

    let host = hostname.to_string();
    let lookup = tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking(move || {
            (host.as_str(), 0u16)
                .to_socket_addrs()
                .map(|addrs| addrs.map(|sa| sa.ip()).collect::<Vec<_>>())
        }),
    )
    .await;
    let elapsed = start.elapsed();

    let resolved = match lookup {
        Err(_) => return Err(DnsError::Timeout(timeout)),
        Ok(Err(join_err)) => {
            return Err(DnsError::ToolUnavailable(format!(
                "resolver task failed: {join_err}"
            )))
        }
        Ok(Ok(Err(e))) => return Err(DnsError::NoRecords(format!("{hostname}: {e}"))),
        Ok(Ok(Ok(ips))) => ips,
    };

    let mut addresses: Vec<IpAddr> = Vec::new();
    for ip in resolved {
        if !addresses.contains(&ip) {
            addresses.push(ip);
        }
    }

    if addresses.is_empty() {
        return Err(DnsError::NoRecords(format!(
            "{hostname}: resolver returned an empty answer"
        )));
    }

    Ok(DnsReply { addresses, elapsed })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let reply = resolve("127.0.0.1", Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply.addresses, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_localhost_dedupes() {
        let reply = resolve("localhost", Duration::from_secs(2)).await.unwrap();
        assert!(!reply.addresses.is_empty());
        let mut seen = reply.addresses.clone();
        seen.dedup();
        assert_eq!(seen.len(), reply.addresses.len());
    }

    #[tokio::test]
    async fn test_resolve_nxdomain() {
        let result = resolve("does-not-exist.invalid", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(DnsError::NoRecords(_))));
    }
}
