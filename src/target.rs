//! Target parsing and validation.
//!
//! A configured target may be a hostname, an IPv4 literal, or a URL. All
//! protocol tests except HTTP operate on the canonical hostname; HTTP keeps
//! the original URL (or derives one from the hostname).

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Characters that must never reach a spawned tool's argument list.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '<', '>', '\\', '"', '\'', '!',
];

/// Target validation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target is empty")]
    Empty,
    #[error("target {0:?} contains shell metacharacters")]
    SuspiciousCharacters(String),
    #[error("{0:?} is not a valid hostname or IPv4 address")]
    BadHostname(String),
}

/// A validated monitoring target, immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    raw: String,
    hostname: String,
    http_url: String,
}

impl Target {
    /// Parse and validate a configured target string.
    ///
    /// URL scheme, port and path are stripped to obtain the canonical
    /// hostname. Rejects shell metacharacters and malformed hostname/IP
    /// syntax before any probe can see the value.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }
        if contains_shell_metacharacters(raw) {
            return Err(ValidationError::SuspiciousCharacters(raw.to_string()));
        }

        let (hostname, http_url) = if let Some(rest) = raw
            .strip_prefix("http://")
            .or_else(|| raw.strip_prefix("https://"))
        {
            let authority = rest
                .split(['/', '?', '#'])
                .next()
                .unwrap_or_default();
            let host = authority.split(':').next().unwrap_or_default();
            (host.to_string(), raw.to_string())
        } else {
            (raw.to_string(), format!("http://{}", raw))
        };

        if !is_valid_host(&hostname) {
            return Err(ValidationError::BadHostname(hostname));
        }

        Ok(Self {
            raw: raw.to_string(),
            hostname,
            http_url,
        })
    }

    /// The target exactly as configured.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Canonical hostname used by every protocol test except HTTP.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// URL used by the HTTP test.
    pub fn http_url(&self) -> &str {
        &self.http_url
    }
}

/// Whether a string carries shell metacharacters or whitespace.
pub fn contains_shell_metacharacters(s: &str) -> bool {
    s.contains(SHELL_METACHARACTERS) || s.chars().any(char::is_whitespace)
}

/// Precondition check for probe operations that spawn external tools.
///
/// Probe implementations call this before placing a hostname on a command
/// line, independent of the validation `Target::parse` already performed.
pub fn ensure_probe_safe(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::Empty);
    }
    if contains_shell_metacharacters(hostname) {
        return Err(ValidationError::SuspiciousCharacters(hostname.to_string()));
    }
    if !is_valid_host(hostname) {
        return Err(ValidationError::BadHostname(hostname.to_string()));
    }
    Ok(())
}

/// Validate hostname or IPv4-literal syntax.
fn is_valid_host(host: &str) -> bool {
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }

    // All-numeric labels that failed the IPv4 parse are malformed addresses,
    // not hostnames.
    if host
        .split('.')
        .all(|label| !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()))
    {
        return false;
    }

    if host.len() > 253 {
        return false;
    }

    static HOSTNAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = HOSTNAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
            .unwrap()
    });
    re.is_match(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hostname() {
        let t = Target::parse("example.com").unwrap();
        assert_eq!(t.hostname(), "example.com");
        assert_eq!(t.http_url(), "http://example.com");
        assert_eq!(t.raw(), "example.com");
    }

    #[test]
    fn test_parse_ipv4_literal() {
        let t = Target::parse("10.0.0.1").unwrap();
        assert_eq!(t.hostname(), "10.0.0.1");
        assert_eq!(t.http_url(), "http://10.0.0.1");
    }

    #[test]
    fn test_parse_url_strips_scheme_port_and_path() {
        let t = Target::parse("https://www.example.com:8443/status?probe=1").unwrap();
        assert_eq!(t.hostname(), "www.example.com");
        assert_eq!(t.http_url(), "https://www.example.com:8443/status?probe=1");
    }

    #[test]
    fn test_rejects_shell_injection() {
        let err = Target::parse("10.0.0.1; rm -rf /").unwrap_err();
        assert!(matches!(err, ValidationError::SuspiciousCharacters(_)));
    }

    #[test]
    fn test_rejects_metacharacters() {
        for bad in ["host`id`", "a|b", "$(whoami)", "host&", "host'"] {
            assert!(
                Target::parse(bad).is_err(),
                "{bad:?} should have been rejected"
            );
        }
    }

    #[test]
    fn test_rejects_malformed_syntax() {
        assert!(matches!(
            Target::parse("999.999.999.999"),
            Err(ValidationError::BadHostname(_))
        ));
        assert!(Target::parse("-leading.dash.com").is_err());
        assert!(Target::parse("two..dots.com").is_err());
        assert!(Target::parse("").is_err());
        assert!(Target::parse("   ").is_err());
    }

    #[test]
    fn test_ensure_probe_safe() {
        assert!(ensure_probe_safe("example.com").is_ok());
        assert!(ensure_probe_safe("8.8.8.8").is_ok());
        assert!(ensure_probe_safe("example.com; true").is_err());
        assert!(ensure_probe_safe("").is_err());
    }
}
