//! Append-only result document store.
//!
//! A single writer task owns the day-keyed JSON array document and
//! serializes appends arriving over a bounded channel, so concurrent target
//! runners never interleave writes. Mid-run the document is an intentionally
//! unterminated array; `finalize` closes it. Opening an existing document
//! recovers from torn tails left by a crash and continues a same-day
//! document that an earlier run already finalized.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::models::TargetResult;

/// Bounded wait before an append is dropped rather than blocking the run.
const APPEND_WAIT: std::time::Duration = std::time::Duration::from_secs(30);

/// Queued appends beyond this back-pressure the senders.
const CHANNEL_CAPACITY: usize = 256;

/// Result store error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("result store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("document already finalized")]
    Finalized,
    #[error("result store writer is gone")]
    WriterGone,
}

enum Command {
    Append(Box<TargetResult>),
    Finalize(oneshot::Sender<Result<(), StoreError>>),
}

/// Handle to the writer task owning today's result document.
#[derive(Clone)]
pub struct ResultStore {
    tx: mpsc::Sender<Command>,
}

impl ResultStore {
    /// Open (or recover) today's document and spawn the writer task.
    pub fn open(dir: &Path, prefix: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "{}-results-{}.json",
            prefix,
            Utc::now().format("%Y%m%d")
        ));
        let document = Document::open(&path)?;
        tracing::info!("result store writing to {}", path.display());

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(run_writer(document, rx));
        Ok(Self { tx })
    }

    /// Enqueue a result for appending.
    ///
    /// Waits a bounded time for channel capacity; on saturation the result
    /// is dropped with a warning instead of stalling the run.
    pub async fn append(&self, result: TargetResult) {
        let target = result.target.clone();
        if let Err(e) = self
            .tx
            .send_timeout(Command::Append(Box::new(result)), APPEND_WAIT)
            .await
        {
            tracing::warn!("result store saturated, dropping result for {target}: {e}");
        }
    }

    /// Close the JSON array. Idempotent: a second call is a no-op.
    pub async fn finalize(&self) -> Result<(), StoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Finalize(ack_tx))
            .await
            .map_err(|_| StoreError::WriterGone)?;
        ack_rx.await.map_err(|_| StoreError::WriterGone)?
    }
}

async fn run_writer(mut document: Document, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Append(result) => {
                if let Err(e) = document.append(&result) {
                    tracing::error!("failed to append result for {}: {e}", result.target);
                }
            }
            Command::Finalize(ack) => {
                let _ = ack.send(document.finalize());
            }
        }
    }
    // Channel closed without finalize: the document stays unterminated and
    // the next open repairs it.
}

/// The on-disk document and its array state.
struct Document {
    path: PathBuf,
    file: File,
    array_open: bool,
    has_entries: bool,
    finalized: bool,
}

impl Document {
    fn open(path: &Path) -> Result<Self, StoreError> {
        let (content, array_open, has_entries) = match fs::read_to_string(path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (String::new(), false, false),
            Err(e) => return Err(e.into()),
            Ok(existing) => recover(&existing),
        };
        fs::write(path, &content)?;
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            array_open,
            has_entries,
            finalized: false,
        })
    }

    fn append(&mut self, result: &TargetResult) -> Result<(), StoreError> {
        if self.finalized {
            return Err(StoreError::Finalized);
        }
        let json = serde_json::to_string(result)?;
        if !self.array_open {
            self.file.write_all(b"[\n")?;
            self.array_open = true;
        } else if self.has_entries {
            self.file.write_all(b",\n")?;
        } else {
            self.file.write_all(b"\n")?;
        }
        self.file.write_all(json.as_bytes())?;
        self.file.flush()?;
        self.has_entries = true;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), StoreError> {
        if self.finalized {
            return Ok(());
        }
        if self.array_open {
            self.file.write_all(b"\n]\n")?;
        } else {
            self.file.write_all(b"[]\n")?;
        }
        self.file.flush()?;
        self.finalized = true;
        tracing::debug!("finalized result document {}", self.path.display());
        Ok(())
    }
}

/// Decide what to keep of an existing document.
///
/// Returns the content to rewrite plus the array-open / has-entries state.
fn recover(existing: &str) -> (String, bool, bool) {
    let trimmed = existing.trim_end();
    if trimmed.is_empty() {
        return (String::new(), false, false);
    }

    // A finalized same-day document: strip the closing bracket and continue
    // the array.
    if let Some(body) = trimmed.strip_suffix(']') {
        if parses_as_array(trimmed) {
            let body = body.trim_end();
            if body == "[" {
                return ("[".to_string(), true, false);
            }
            return (body.to_string(), true, true);
        }
    }

    repair_torn(trimmed)
}

/// Truncate a torn document to the longest prefix that closes into a valid
/// JSON array.
fn repair_torn(content: &str) -> (String, bool, bool) {
    let mut end = content.len();
    while let Some(pos) = content[..end].rfind('}') {
        let candidate = &content[..=pos];
        let mut closed = String::with_capacity(candidate.len() + 1);
        closed.push_str(candidate);
        closed.push(']');
        if parses_as_array(&closed) {
            return (candidate.to_string(), true, true);
        }
        end = pos;
    }
    if content.trim_start().starts_with('[') {
        ("[".to_string(), true, false)
    } else {
        (String::new(), false, false)
    }
}

fn parses_as_array(s: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(s)
        .map(|v| v.is_array())
        .unwrap_or(false)
}
