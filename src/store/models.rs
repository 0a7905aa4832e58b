//! Result data model.
//!
//! These types are the wire format of the result document: field names and
//! statuses here are what external consumers parse.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome status of one test kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Success,
    Failed,
    Disabled,
}

/// Outcome of one (target, test kind) pair.
///
/// Only the metrics relevant to the kind are populated; absent fields are
/// omitted from the serialized object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_ports: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovered_mtu: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hop: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestOutcome {
    fn with_status(status: TestStatus) -> Self {
        Self {
            status,
            time_ms: None,
            code: None,
            records: None,
            open_ports: None,
            discovered_mtu: None,
            hops: None,
            last_hop: None,
            download_mbps: None,
            upload_mbps: None,
            error: None,
        }
    }

    /// A test kind switched off in configuration, with the reason.
    pub fn disabled(reason: &str) -> Self {
        Self {
            error: Some(reason.to_string()),
            ..Self::with_status(TestStatus::Disabled)
        }
    }

    /// A failed test with its failure reason.
    pub fn failed(reason: impl ToString) -> Self {
        Self {
            error: Some(reason.to_string()),
            ..Self::with_status(TestStatus::Failed)
        }
    }

    pub fn dns_success(records: Vec<String>, elapsed: Duration) -> Self {
        Self {
            time_ms: Some(elapsed.as_secs_f64() * 1000.0),
            records: Some(records),
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn ping_success(elapsed: Duration) -> Self {
        Self {
            time_ms: Some(elapsed.as_secs_f64() * 1000.0),
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn http_success(code: u16, elapsed: Duration) -> Self {
        Self {
            code: Some(code),
            time_ms: Some(elapsed.as_secs_f64() * 1000.0),
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn ports_success(open_ports: Vec<u16>) -> Self {
        Self {
            open_ports: Some(open_ports),
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn mtu_success(discovered_mtu: u16) -> Self {
        Self {
            discovered_mtu: Some(discovered_mtu),
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn bandwidth_success(download_mbps: f64, upload_mbps: Option<f64>) -> Self {
        Self {
            download_mbps: Some(download_mbps),
            upload_mbps,
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn traceroute_success(hops: u32, last_hop: String) -> Self {
        Self {
            hops: Some(hops),
            last_hop: Some(last_hop),
            ..Self::with_status(TestStatus::Success)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TestStatus::Success
    }
}

/// All test outcomes for one target, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub dns: TestOutcome,
    pub ping: TestOutcome,
    pub bandwidth: TestOutcome,
    pub ports: TestOutcome,
    pub mtu: TestOutcome,
    pub http: TestOutcome,
    pub traceroute: TestOutcome,
}

impl TargetResult {
    /// A target is reachable when any enabled test kind succeeded.
    pub fn is_reachable(&self) -> bool {
        [
            &self.dns,
            &self.ping,
            &self.bandwidth,
            &self.ports,
            &self.mtu,
            &self.http,
            &self.traceroute,
        ]
        .into_iter()
        .any(TestOutcome::is_success)
    }
}

/// Summary of one run, consumed by alerting and the exit code.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub targets_total: usize,
    pub failed_targets: Vec<String>,
}

impl RunSummary {
    pub fn record_failure(&mut self, target: &str) {
        self.failed_targets.push(target.to_string());
    }

    pub fn all_reachable(&self) -> bool {
        self.failed_targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result(reachable: bool) -> TargetResult {
        let ping = if reachable {
            TestOutcome::ping_success(Duration::from_millis(12))
        } else {
            TestOutcome::failed("host unreachable")
        };
        TargetResult {
            target: "example.com".to_string(),
            timestamp: Utc::now(),
            dns: TestOutcome::failed("no records"),
            ping,
            bandwidth: TestOutcome::disabled("disabled in configuration"),
            ports: TestOutcome::disabled("disabled in configuration"),
            mtu: TestOutcome::disabled("disabled in configuration"),
            http: TestOutcome::failed("connect error"),
            traceroute: TestOutcome::disabled("disabled in configuration"),
        }
    }

    #[test]
    fn test_reachability_needs_one_success() {
        assert!(sample_result(true).is_reachable());
        assert!(!sample_result(false).is_reachable());
    }

    #[test]
    fn test_outcome_serialization_omits_absent_fields() {
        let json = serde_json::to_string(&TestOutcome::ping_success(Duration::from_millis(5)))
            .unwrap();
        assert!(json.contains(r#""status":"success""#));
        assert!(json.contains("time_ms"));
        assert!(!json.contains("open_ports"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(
            serde_json::to_string(&TestStatus::Disabled).unwrap(),
            r#""disabled""#
        );
        assert_eq!(
            serde_json::to_string(&TestStatus::Failed).unwrap(),
            r#""failed""#
        );
    }

    #[test]
    fn test_result_roundtrip() {
        let result = sample_result(true);
        let json = serde_json::to_string(&result).unwrap();
        let back: TargetResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.target, "example.com");
        assert_eq!(back.ping.status, TestStatus::Success);
        assert_eq!(back.bandwidth.status, TestStatus::Disabled);
    }

    #[test]
    fn test_run_summary() {
        let mut summary = RunSummary {
            targets_total: 3,
            ..RunSummary::default()
        };
        assert!(summary.all_reachable());
        summary.record_failure("bad.example.com");
        assert!(!summary.all_reachable());
        assert_eq!(summary.failed_targets, vec!["bad.example.com"]);
    }
}
