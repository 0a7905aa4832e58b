//! TCP connect probe for port scanning.

use std::time::Duration;

use tokio::net::TcpStream;

use super::PortScanError;

/// Attempt a TCP connection. Closed, filtered, and timed-out ports are all
/// `Ok(false)`; only a backend without TCP capability would error, which
/// native sockets never do.
pub async fn connect_tcp(
    hostname: &str,
    port: u16,
    timeout: Duration,
) -> Result<bool, PortScanError> {
    match tokio::time::timeout(timeout, TcpStream::connect((hostname, port))).await {
        Ok(Ok(_stream)) => Ok(true),
        // A sandbox that denies socket creation has no capability to test
        // any port; refused/unreachable ports are simply closed.
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(PortScanError::NoToolAvailable(e.to_string()))
        }
        Ok(Err(_)) => Ok(false),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_tcp_open_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let open = connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(open);
    }

    #[tokio::test]
    async fn test_connect_tcp_closed_port() {
        // Bind then drop to get a port that is very likely closed.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let open = connect_tcp("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!open);
    }

    #[tokio::test]
    async fn test_connect_tcp_filtered_times_out_as_closed() {
        // 192.0.2.0/24 is TEST-NET-1; connects black-hole.
        let open = connect_tcp("192.0.2.1", 80, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(!open);
    }
}
