//! HTTP reachability probe.

use std::error::Error as _;
use std::time::{Duration, Instant};

use super::{HttpError, HttpReply};

/// Fetch a URL and report the status code and total transfer time.
///
/// The body is drained so the elapsed time covers the full response, the
/// way a real client experiences it. A status of 400 or above is a failure.
pub async fn fetch_http(
    url: &str,
    timeout: Duration,
    user_agent: &str,
) -> Result<HttpReply, HttpError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .map_err(|e| HttpError::Connect(e.to_string()))?;

    let start = Instant::now();

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| classify_error(e, timeout))?;

    let status = response.status().as_u16();
    // Drain the body; a failure here means the server already answered, so
    // the status still stands.
    let _ = response.bytes().await;
    let elapsed = start.elapsed();

    if status >= 400 {
        return Err(HttpError::Other(status));
    }

    Ok(HttpReply { status, elapsed })
}

/// Map a reqwest transport error onto the probe taxonomy.
fn classify_error(e: reqwest::Error, timeout: Duration) -> HttpError {
    if e.is_timeout() {
        return HttpError::Timeout(timeout);
    }

    let text = error_chain_text(&e);
    let lower = text.to_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
        HttpError::Resolve(text)
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        HttpError::Tls(text)
    } else if lower.contains("connection closed before message completed")
        || lower.contains("incompletemessage")
    {
        HttpError::EmptyReply
    } else {
        HttpError::Connect(text)
    }
}

/// Join an error with its source chain; reqwest's top-level Display often
/// hides the interesting cause.
fn error_chain_text(e: &reqwest::Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
