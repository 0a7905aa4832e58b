//! Alert dispatch over email and webhook.
//!
//! Delivery problems are logged and swallowed: a failed notification must
//! never abort a run that already has results to persist.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::AlertConfig;
use crate::store::RunSummary;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

const ALERT_SUBJECT: &str = "netsentry: unreachable targets";

/// Characters that disqualify a webhook URL. Stricter than a URL parser
/// needs to be: nothing here ever reaches a shell, but the destination is
/// operator-supplied and worth rejecting early.
const URL_METACHARACTERS: &[char] = &[
    ';', '|', '`', '$', '(', ')', '{', '}', '<', '>', '\\', '"', '\'',
];

/// Alert delivery error types.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("mail delivery failed: {0}")]
    Mail(String),
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
    #[error("invalid webhook url {0:?}")]
    InvalidWebhook(String),
}

/// Mail-sending capability, mockable in tests.
#[allow(async_fn_in_trait)]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError>;
}

/// Pipes messages to the local `sendmail`.
pub struct SendmailMailer;

impl Mailer for SendmailMailer {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DeliveryError> {
        let message = format!("To: {recipient}\nSubject: {subject}\n\n{body}\n");

        let mut child = Command::new("sendmail")
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DeliveryError::Mail(format!("failed to spawn sendmail: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.as_bytes())
                .await
                .map_err(|e| DeliveryError::Mail(format!("failed to write message: {e}")))?;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DeliveryError::Mail(e.to_string()))?;
        if !status.success() {
            return Err(DeliveryError::Mail(format!("sendmail exited with {status}")));
        }
        Ok(())
    }
}

/// JSON body posted to the webhook. Serialization handles all escaping;
/// the message text is never spliced into JSON by hand.
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    targets_total: usize,
    failed_targets: &'a [String],
}

/// Formats and delivers failure notifications.
pub struct AlertDispatcher<M> {
    config: AlertConfig,
    mailer: M,
}

impl<M: Mailer> AlertDispatcher<M> {
    pub fn new(config: AlertConfig, mailer: M) -> Self {
        Self { config, mailer }
    }

    /// Send notifications for a failed run. A clean summary or disabled
    /// alerting is a no-op; delivery failures are logged warnings.
    pub async fn dispatch(&self, summary: &RunSummary) {
        if !self.config.enabled || summary.all_reachable() {
            return;
        }

        let message = format_alert(summary);

        if let Some(recipient) = self.config.email_to.as_deref() {
            match self.mailer.send(recipient, ALERT_SUBJECT, &message).await {
                Ok(()) => tracing::info!("alert mailed to {recipient}"),
                Err(e) => tracing::warn!("alert email not delivered: {e}"),
            }
        }

        if let Some(url) = self.config.webhook_url.as_deref() {
            match post_webhook(url, &message, summary).await {
                Ok(()) => tracing::info!("alert webhook delivered"),
                Err(e) => tracing::warn!("alert webhook not delivered: {e}"),
            }
        }
    }
}

/// Plain-text alert naming every failed target.
pub fn format_alert(summary: &RunSummary) -> String {
    let mut message = format!(
        "{} of {} targets unreachable:\n",
        summary.failed_targets.len(),
        summary.targets_total
    );
    for target in &summary.failed_targets {
        message.push_str(" - ");
        message.push_str(target);
        message.push('\n');
    }
    message
}

/// Check a webhook destination against the `http(s)://host[:port][/path]`
/// shape and reject metacharacters.
pub fn validate_webhook_url(url: &str) -> Result<(), DeliveryError> {
    if url.contains(URL_METACHARACTERS) || url.chars().any(char::is_whitespace) {
        return Err(DeliveryError::InvalidWebhook(url.to_string()));
    }

    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        Regex::new(r"^https?://[A-Za-z0-9.-]+(:[0-9]{1,5})?(/.*)?$").unwrap()
    });
    if !re.is_match(url) {
        return Err(DeliveryError::InvalidWebhook(url.to_string()));
    }
    Ok(())
}

async fn post_webhook(url: &str, message: &str, summary: &RunSummary) -> Result<(), DeliveryError> {
    validate_webhook_url(url)?;

    let client = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .map_err(|e| DeliveryError::Webhook(e.to_string()))?;

    let payload = WebhookPayload {
        text: message,
        targets_total: summary.targets_total,
        failed_targets: &summary.failed_targets,
    };

    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| DeliveryError::Webhook(e.to_string()))?;

    if !response.status().is_success() {
        return Err(DeliveryError::Webhook(format!(
            "endpoint returned HTTP {}",
            response.status().as_u16()
        )));
    }
    Ok(())
}
