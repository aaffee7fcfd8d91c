//! File sink
//!
//! Lines are queued to a single writer task and appended in the order they
//! were issued. Appends are fire-and-forget: a failed write is reported on the
//! console at critical severity and otherwise ignored.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use super::console::Console;
use super::level::LogLevel;
use crate::config::friendly_io_error_message;

enum WriteRequest {
    Line { path: PathBuf, text: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to the background file writer
#[derive(Debug, Clone)]
pub struct FileLogSink {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl std::fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteRequest::Line { path, .. } => f.debug_struct("Line").field("path", path).finish(),
            WriteRequest::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl FileLogSink {
    /// Start the writer task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(console: Console) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(rx, console));
        Self { tx }
    }

    /// Queue `text` (plus a newline) for appending to `path`
    pub fn append(&self, path: PathBuf, text: String) {
        // The writer only goes away with the runtime
        let _ = self.tx.send(WriteRequest::Line { path, text });
    }

    /// Wait until every line queued before this call has been written
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteRequest::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn run_writer(mut rx: mpsc::UnboundedReceiver<WriteRequest>, console: Console) {
    while let Some(request) = rx.recv().await {
        match request {
            WriteRequest::Line { path, text } => {
                if let Err(e) = append_line(&path, &text).await {
                    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                    console.write_entry(
                        &timestamp,
                        LogLevel::Critical,
                        "cli",
                        &friendly_io_error_message(&e, "Saving log to file failed"),
                    );
                }
            }
            WriteRequest::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append_line(path: &Path, text: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut line = String::with_capacity(text.len() + 1);
    line.push_str(text);
    line.push('\n');

    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
