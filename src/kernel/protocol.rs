//! Line protocol spoken with a process core
//!
//! One JSON object per line, tagged by `"type"`. The core writes
//! [`CoreMessage`]s on its stdout and reads [`ShellMessage`]s on its stdin.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PromptAnswer, PromptKind};

/// Message sent by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreMessage {
    /// A log entry for one of the emitters
    Log {
        level: String,
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        values: Vec<Value>,
    },
    /// A question for the operator
    Prompt {
        nonce: String,
        info: String,
        kind: PromptKind,
        #[serde(default)]
        default: Option<PromptAnswer>,
    },
    /// Startup finished
    Started,
    /// Startup failed
    StartFailed {
        #[serde(default)]
        reason: String,
    },
    /// The core stopped on its own
    Stopped {
        #[serde(default)]
        restart: bool,
    },
}

/// Message sent to the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellMessage {
    Start,
    Stop,
    Answer { nonce: String, value: PromptAnswer },
}

/// Parse one line from the core
pub fn decode(line: &str) -> Result<CoreMessage, serde_json::Error> {
    serde_json::from_str(line)
}

/// Serialize a message as one newline-terminated line
pub fn encode(message: &ShellMessage) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Render a log value: strings verbatim, anything else as compact JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
