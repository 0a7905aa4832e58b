//! Configuration module for netsentry.
//!
//! Loads a validated, immutable configuration from a JSON file. The file
//! path comes from `NETSENTRY_CONFIG` (default: "netsentry.json"); every
//! field is defaulted so a minimal file only needs a target list.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Per-test enable flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TestToggles {
    pub dns: bool,
    pub ping: bool,
    pub bandwidth: bool,
    pub ports: bool,
    pub mtu: bool,
    pub http: bool,
    pub traceroute: bool,
}

impl Default for TestToggles {
    fn default() -> Self {
        Self {
            dns: true,
            ping: true,
            bandwidth: false,
            ports: true,
            mtu: false,
            http: true,
            traceroute: true,
        }
    }
}

/// Per-test timeouts in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub dns: f64,
    pub ping: f64,
    pub tcp: f64,
    pub http: f64,
    pub bandwidth: f64,
    pub traceroute: f64,
    pub mtu_probe: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dns: 5.0,
            ping: 5.0,
            tcp: 3.0,
            http: 10.0,
            bandwidth: 30.0,
            traceroute: 60.0,
            mtu_probe: 3.0,
        }
    }
}

/// MTU discovery search range.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MtuConfig {
    pub min: u16,
    pub max: u16,
    pub step: u16,
}

impl Default for MtuConfig {
    fn default() -> Self {
        Self {
            min: 576,
            max: 1500,
            step: 10,
        }
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub email_to: Option<String>,
    pub webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            email_to: None,
            webhook_url: None,
        }
    }
}

/// Validated run configuration, threaded by reference into every component.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Targets to test: hostnames, IPv4 literals, or URLs.
    pub targets: Vec<String>,
    /// Directory for result documents and traceroute captures.
    pub results_dir: PathBuf,
    /// Filename prefix for result documents.
    pub file_prefix: String,
    /// Path of the health file overwritten each run.
    pub health_file: PathBuf,
    /// Result files older than this many days are pruned (0 disables).
    pub retention_days: u32,
    /// Worker-pool width for concurrent targets.
    pub max_concurrent_targets: usize,
    pub tests: TestToggles,
    pub timeouts: Timeouts,
    /// Echo requests per ping test.
    pub ping_count: u32,
    /// Comma-separated port list; empty uses the default set.
    pub ports: String,
    pub mtu: MtuConfig,
    /// URL for the bandwidth transfer test.
    pub bandwidth_url: Option<String>,
    /// Also measure upload throughput.
    pub bandwidth_upload: bool,
    pub http_user_agent: String,
    pub traceroute_max_hops: u32,
    pub alerts: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            results_dir: PathBuf::from("results"),
            file_prefix: "netsentry".to_string(),
            health_file: PathBuf::from("health.json"),
            retention_days: 30,
            max_concurrent_targets: 4,
            tests: TestToggles::default(),
            timeouts: Timeouts::default(),
            ping_count: 3,
            ports: String::new(),
            mtu: MtuConfig::default(),
            bandwidth_url: None,
            bandwidth_upload: false,
            http_user_agent: format!("netsentry/{}", env!("CARGO_PKG_VERSION")),
            traceroute_max_hops: 30,
            alerts: AlertConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the file named by `NETSENTRY_CONFIG`.
    ///
    /// Environment variables:
    /// - `NETSENTRY_CONFIG`: configuration file path (default: "netsentry.json")
    /// - `NETSENTRY_RESULTS_DIR`: overrides the results directory
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("NETSENTRY_CONFIG").unwrap_or_else(|_| "netsentry.json".to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load and validate configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: Config = serde_json::from_str(&raw)?;

        if let Ok(dir) = env::var("NETSENTRY_RESULTS_DIR") {
            cfg.results_dir = PathBuf::from(dir);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check cross-field invariants the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("no targets configured".to_string()));
        }
        if self.mtu.min < 68 || self.mtu.min >= self.mtu.max || self.mtu.max > 9000 {
            return Err(ConfigError::Invalid(format!(
                "mtu range must satisfy 68 <= min < max <= 9000, got {}..{}",
                self.mtu.min, self.mtu.max
            )));
        }
        if self.mtu.step < 1 || self.mtu.step > 100 {
            return Err(ConfigError::Invalid(format!(
                "mtu step must be in 1..=100, got {}",
                self.mtu.step
            )));
        }
        if self.ping_count == 0 {
            return Err(ConfigError::Invalid("ping_count must be at least 1".to_string()));
        }
        if self.max_concurrent_targets == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_targets must be at least 1".to_string(),
            ));
        }
        let t = &self.timeouts;
        for (name, value) in [
            ("dns", t.dns),
            ("ping", t.ping),
            ("tcp", t.tcp),
            ("http", t.http),
            ("bandwidth", t.bandwidth),
            ("traceroute", t.traceroute),
            ("mtu_probe", t.mtu_probe),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "timeout {name} must be a positive number of seconds"
                )));
            }
        }
        Ok(())
    }
}
