//! Health file for external monitoring.
//!
//! A single JSON object overwritten on each status transition; monitoring
//! reads it to tell a running prober from a wedged one.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Run state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Starting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    /// Seconds since process start.
    pub uptime: f64,
    pub memory_usage_mb: f64,
    pub targets_configured: usize,
    pub pid: u32,
}

/// Writes the health file atomically on each transition.
pub struct HealthReporter {
    path: PathBuf,
    started: Instant,
    targets_configured: usize,
}

impl HealthReporter {
    pub fn new(path: PathBuf, targets_configured: usize) -> Self {
        Self {
            path,
            started: Instant::now(),
            targets_configured,
        }
    }

    /// Overwrite the health file with the current state. Uses a temp file
    /// and rename so readers never see a partial object.
    pub fn write(&self, status: HealthStatus) -> std::io::Result<()> {
        let report = HealthReport {
            status,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime: self.started.elapsed().as_secs_f64(),
            memory_usage_mb: resident_memory_mb(),
            targets_configured: self.targets_configured,
            pid: std::process::id(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }
}

/// Resident set size in MiB, read from /proc where available.
fn resident_memory_mb() -> f64 {
    if cfg!(target_os = "linux") {
        if let Ok(status) = fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest
                        .split_whitespace()
                        .next()
                        .and_then(|v| v.parse::<f64>().ok())
                    {
                        return kb / 1024.0;
                    }
                }
            }
        }
    }
    0.0
}
