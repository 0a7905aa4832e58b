//! Path MTU discovery by binary search over don't-fragment probes.

use std::time::Duration;

use thiserror::Error;

use crate::probe::NetworkProbe;

/// Hard cap on probe count, bounding worst-case latency even if the search
/// never converges.
pub const MAX_PROBES: u32 = 50;

/// IPv4 + ICMP header bytes subtracted from a candidate MTU to get the echo
/// payload size.
const HEADER_BYTES: i32 = 28;

/// Largest payload an ICMP echo can carry.
const MAX_ICMP_PAYLOAD: i32 = 65507;

/// MTU discovery error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MtuError {
    #[error("no packet size passed without fragmentation")]
    NoValidMtuFound,
}

/// Outcome of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtuReport {
    pub discovered_mtu: u16,
    pub probes: u32,
}

/// Find the largest MTU in `[min, max]` whose don't-fragment probe
/// succeeds.
///
/// Bisects the interval: a successful probe at `mid` records it as the
/// current best and moves `low` to `mid + step`; a failure moves `high` to
/// `mid - step`. Candidates whose payload falls outside what ICMP can carry
/// are skipped toward the valid side without spending a probe. Stops when
/// the interval empties or after [`MAX_PROBES`] probes.
///
/// `NoValidMtuFound` is decided by whether any probe succeeded, never by
/// comparing the best candidate against `min`.
pub async fn discover_path_mtu<P: NetworkProbe>(
    probe: &P,
    hostname: &str,
    min: u16,
    max: u16,
    step: u16,
    per_probe_timeout: Duration,
) -> Result<MtuReport, MtuError> {
    let step = i32::from(step.max(1));
    let mut low = i32::from(min);
    let mut high = i32::from(max);
    let mut best = i32::from(min);
    let mut probes = 0u32;
    let mut succeeded = false;

    while low <= high && probes < MAX_PROBES {
        let mid = (low + high) / 2;
        let payload = mid - HEADER_BYTES;
        if payload < 0 {
            low = mid + step;
            continue;
        }
        if payload > MAX_ICMP_PAYLOAD {
            high = mid - step;
            continue;
        }

        probes += 1;
        if probe
            .ping_with_size(hostname, payload as usize, true, per_probe_timeout)
            .await
        {
            best = mid;
            succeeded = true;
            low = mid + step;
        } else {
            high = mid - step;
        }
    }

    if !succeeded {
        return Err(MtuError::NoValidMtuFound);
    }

    Ok(MtuReport {
        discovered_mtu: best as u16,
        probes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::mock::MockProbe;

    fn log2_bound(min: u16, max: u16) -> u32 {
        (f64::from(max - min)).log2().ceil() as u32 + 1
    }

    #[tokio::test]
    async fn test_converges_on_threshold() {
        // Everything at or below 1000 passes, everything above fragments.
        let probe = MockProbe {
            path_mtu: Some(1000),
            ..MockProbe::default()
        };

        let report = discover_path_mtu(&probe, "example.com", 576, 1500, 10, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(
            (991..=1010).contains(&report.discovered_mtu),
            "expected within one step of 1000, got {}",
            report.discovered_mtu
        );
        assert!(report.probes <= 11);
        assert_eq!(probe.df_probes.load(std::sync::atomic::Ordering::Relaxed), report.probes);
    }

    #[tokio::test]
    async fn test_all_probes_fail() {
        let probe = MockProbe {
            path_mtu: None,
            ..MockProbe::default()
        };

        let result =
            discover_path_mtu(&probe, "example.com", 576, 1500, 10, Duration::from_secs(1)).await;
        assert_eq!(result, Err(MtuError::NoValidMtuFound));
    }

    #[tokio::test]
    async fn test_threshold_below_min_is_not_found() {
        // A path MTU below the search floor never yields a success, so the
        // run reports failure rather than echoing the floor back.
        let probe = MockProbe {
            path_mtu: Some(400),
            ..MockProbe::default()
        };

        let result =
            discover_path_mtu(&probe, "example.com", 576, 1500, 10, Duration::from_secs(1)).await;
        assert_eq!(result, Err(MtuError::NoValidMtuFound));
    }

    #[tokio::test]
    async fn test_clean_path_converges_near_max() {
        let probe = MockProbe {
            path_mtu: Some(1500),
            ..MockProbe::default()
        };

        let report = discover_path_mtu(&probe, "example.com", 1200, 1500, 10, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(report.discovered_mtu, 1500);
        assert!(report.probes <= log2_bound(1200, 1500));
    }

    #[tokio::test]
    async fn test_termination_bounds() {
        for (min, max, step, path) in [
            (68u16, 9000u16, 1u16, Some(4000u16)),
            (68, 9000, 100, Some(68)),
            (576, 1500, 1, Some(1499)),
            (576, 577, 10, Some(9000)),
        ] {
            let probe = MockProbe {
                path_mtu: path,
                ..MockProbe::default()
            };
            let outcome =
                discover_path_mtu(&probe, "example.com", min, max, step, Duration::from_secs(1))
                    .await;
            let spent = probe.df_probes.load(std::sync::atomic::Ordering::Relaxed);
            assert!(
                spent <= MAX_PROBES,
                "{min}..{max} step {step}: spent {spent} probes"
            );
            if let Ok(report) = outcome {
                assert!(report.discovered_mtu >= min && report.discovered_mtu <= max);
            }
        }
    }

    #[tokio::test]
    async fn test_single_step_interval() {
        let probe = MockProbe {
            path_mtu: Some(1500),
            ..MockProbe::default()
        };
        let report = discover_path_mtu(&probe, "example.com", 1499, 1500, 10, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(report.discovered_mtu == 1499 || report.discovered_mtu == 1500);
        assert_eq!(report.probes, 1);
    }
}
