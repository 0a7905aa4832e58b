//! Retention pass for result files.
//!
//! Deletes result documents and traceroute captures whose filename date key
//! is older than the configured retention. Runs once per invocation, after
//! the document is finalized.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use regex::Regex;

/// Delete result files older than `retention_days`. Returns how many were
/// removed. A retention of 0 disables pruning.
pub fn prune_results(dir: &Path, retention_days: u32, now: DateTime<Utc>) -> usize {
    if retention_days == 0 {
        return 0;
    }
    let cutoff = now.date_naive() - ChronoDuration::days(i64::from(retention_days));

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("retention: cannot read {}: {e}", dir.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.ends_with(".json") || name.ends_with(".txt")) {
            continue;
        }
        let Some(date) = file_date(&name) else {
            continue;
        };
        if date < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    tracing::info!("retention: removed {name}");
                    removed += 1;
                }
                Err(e) => tracing::warn!("retention: failed to remove {name}: {e}"),
            }
        }
    }
    removed
}

/// Extract the YYYYMMDD date key from a result filename.
fn file_date(name: &str) -> Option<NaiveDate> {
    static DATE_RE: OnceLock<Regex> = OnceLock::new();
    let re = DATE_RE.get_or_init(|| Regex::new(r"-(\d{8})[.-]").unwrap());
    let caps = re.captures(name)?;
    NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()
}
