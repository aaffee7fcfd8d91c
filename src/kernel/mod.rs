//! Core capability interface
//!
//! The shell drives an externally supplied core through the [`Core`] trait.
//! The core reports back through the log emitters it was constructed with,
//! a prompt-request event source, and a lifecycle-signal source.

pub mod loader;
pub mod process;
pub mod protocol;

pub use loader::{load_core, CoreManifest, MANIFEST_FILE};
pub use process::{CoreLaunch, ProcessCore};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Receiver of prompt requests raised by the core
pub type PromptEventReceiver = mpsc::UnboundedReceiver<PromptRequest>;

/// Receiver of the core's own start/stop signals
pub type CoreSignalReceiver = mpsc::UnboundedReceiver<CoreSignal>;

/// The core wants an answer to the prompt registered under `nonce`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub nonce: String,
}

/// Lifecycle notifications emitted by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreSignal {
    /// The core finished starting (informational)
    Started,
    /// The core stopped; without `restart` the shell shuts down too
    Stopped { restart: bool },
}

/// Kind of answer a prompt expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    YesNo,
    Text,
}

/// Answer to a prompt, also used for prompt defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptAnswer {
    YesNo(bool),
    Text(String),
}

impl fmt::Display for PromptAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptAnswer::YesNo(true) => write!(f, "Y"),
            PromptAnswer::YesNo(false) => write!(f, "N"),
            PromptAnswer::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Callback receiving the answer to a prompt
pub type PromptCallback = Box<dyn FnOnce(PromptAnswer) + Send + Sync>;

/// A question the core is waiting on
///
/// Answering consumes the prompt, so each nonce is resolved at most once.
pub struct PendingPrompt {
    pub nonce: String,
    pub info: String,
    pub kind: PromptKind,
    pub default: Option<PromptAnswer>,
    callback: PromptCallback,
}

impl PendingPrompt {
    pub fn new(
        nonce: impl Into<String>,
        info: impl Into<String>,
        kind: PromptKind,
        default: Option<PromptAnswer>,
        callback: PromptCallback,
    ) -> Self {
        Self {
            nonce: nonce.into(),
            info: info.into(),
            kind,
            default,
            callback,
        }
    }

    /// Deliver the answer to the core
    pub fn answer(self, answer: PromptAnswer) {
        (self.callback)(answer)
    }
}

impl fmt::Debug for PendingPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPrompt")
            .field("nonce", &self.nonce)
            .field("info", &self.info)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

/// Pending prompts keyed by nonce
#[derive(Debug, Clone, Default)]
pub struct PromptTable {
    inner: Arc<Mutex<HashMap<String, PendingPrompt>>>,
}

impl PromptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt, replacing any earlier one with the same nonce
    pub fn insert(&self, prompt: PendingPrompt) {
        if let Ok(mut prompts) = self.inner.lock() {
            prompts.insert(prompt.nonce.clone(), prompt);
        }
    }

    /// Remove and return the prompt registered under `nonce`
    pub fn take(&self, nonce: &str) -> Option<PendingPrompt> {
        self.inner.lock().ok()?.remove(nonce)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors raised while loading or driving the core
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("core manifest not found at {}", .0.display())]
    ManifestMissing(PathBuf),
    #[error("failed to read core manifest {}: {source}", path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid core manifest {}: {source}", path.display())]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("core entry point {} does not exist", .0.display())]
    EntryMissing(PathBuf),
    #[error("failed to launch core: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("core failed to start: {0}")]
    StartFailed(String),
    #[error("core exited before it finished starting")]
    ExitedBeforeStart,
    #[error("core I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface every core satisfies
///
/// # Object Safety
/// This trait is object-safe to allow `Arc<dyn Core>` usage.
#[async_trait]
pub trait Core: Send + Sync {
    /// Name used as log source for the core's unattributed output
    fn name(&self) -> &str;

    /// Start the core; resolves once it is running
    async fn start(&self) -> Result<(), CoreError>;

    /// Stop the core; resolves once it has shut down
    async fn stop(&self) -> Result<(), CoreError>;

    /// Subscribe to prompt requests (only the first call gets the receiver)
    fn take_prompt_events(&self) -> Option<PromptEventReceiver>;

    /// Subscribe to lifecycle signals (only the first call gets the receiver)
    fn take_lifecycle_signals(&self) -> Option<CoreSignalReceiver>;

    /// Look up and claim the prompt registered under `nonce`
    fn take_prompt(&self, nonce: &str) -> Option<PendingPrompt>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_prompt(nonce: &str, calls: Arc<AtomicUsize>) -> PendingPrompt {
        PendingPrompt::new(
            nonce,
            "Continue?",
            PromptKind::YesNo,
            None,
            Box::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_prompt_table_take_is_single_use() {
        let calls = Arc::new(AtomicUsize::new(0));
        let table = PromptTable::new();
        table.insert(counting_prompt("n1", Arc::clone(&calls)));
        assert_eq!(table.len(), 1);

        let prompt = table.take("n1").unwrap();
        assert!(table.take("n1").is_none());
        assert!(table.is_empty());

        prompt.answer(PromptAnswer::YesNo(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_nonce() {
        let table = PromptTable::new();
        assert!(table.take("missing").is_none());
    }

    #[test]
    fn test_prompt_answer_serialization() {
        assert_eq!(serde_json::to_string(&PromptAnswer::YesNo(true)).unwrap(), "true");
        assert_eq!(
            serde_json::to_string(&PromptAnswer::Text("abc".into())).unwrap(),
            "\"abc\""
        );
        let parsed: PromptAnswer = serde_json::from_str("false").unwrap();
        assert_eq!(parsed, PromptAnswer::YesNo(false));
        let parsed: PromptAnswer = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(parsed, PromptAnswer::Text("x".into()));
    }

    #[test]
    fn test_prompt_answer_display() {
        assert_eq!(PromptAnswer::YesNo(true).to_string(), "Y");
        assert_eq!(PromptAnswer::YesNo(false).to_string(), "N");
        assert_eq!(PromptAnswer::Text("later".into()).to_string(), "later");
    }

    #[test]
    fn test_pending_prompt_debug_hides_callback() {
        let prompt = counting_prompt("n2", Arc::new(AtomicUsize::new(0)));
        let debug = format!("{:?}", prompt);
        assert!(debug.contains("n2"));
        assert!(debug.contains("YesNo"));
    }
}
