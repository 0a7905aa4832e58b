//! Bandwidth probe: timed HTTP transfers against a configured test URL.

use std::time::{Duration, Instant};

use super::{BandwidthError, BandwidthReply};

/// Bytes posted for the upload measurement.
const UPLOAD_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

/// Measure download (and optionally upload) throughput in Mbit/s.
pub async fn measure_bandwidth(
    url: &str,
    timeout: Duration,
    test_upload: bool,
) -> Result<BandwidthReply, BandwidthError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BandwidthError::NoTool(e.to_string()))?;

    let download_mbps = time_download(&client, url).await?;
    let upload_mbps = if test_upload {
        Some(time_upload(&client, url).await?)
    } else {
        None
    };

    Ok(BandwidthReply {
        download_mbps,
        upload_mbps,
    })
}

async fn time_download(client: &reqwest::Client, url: &str) -> Result<f64, BandwidthError> {
    let start = Instant::now();
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| BandwidthError::TransferFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(BandwidthError::TransferFailed(format!(
            "server returned HTTP {}",
            response.status().as_u16()
        )));
    }

    let mut bytes: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| BandwidthError::TransferFailed(e.to_string()))?
    {
        bytes += chunk.len() as u64;
    }
    let elapsed = start.elapsed().as_secs_f64();

    if bytes == 0 {
        return Err(BandwidthError::TransferFailed(
            "no data transferred".to_string(),
        ));
    }

    Ok(mbps(bytes, elapsed))
}

async fn time_upload(client: &reqwest::Client, url: &str) -> Result<f64, BandwidthError> {
    let payload = vec![0u8; UPLOAD_PAYLOAD_BYTES];

    let start = Instant::now();
    let response = client
        .post(url)
        .body(payload)
        .send()
        .await
        .map_err(|e| BandwidthError::TransferFailed(e.to_string()))?;
    let elapsed = start.elapsed().as_secs_f64();

    if !response.status().is_success() {
        return Err(BandwidthError::TransferFailed(format!(
            "upload rejected with HTTP {}",
            response.status().as_u16()
        )));
    }

    Ok(mbps(UPLOAD_PAYLOAD_BYTES as u64, elapsed))
}

fn mbps(bytes: u64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / seconds / 1_000_000.0
}
