//! Terminal prompts on behalf of the core
//!
//! The core raises a prompt request carrying a nonce; the relay claims the
//! matching [`PendingPrompt`], asks the question on the terminal, and answers
//! it exactly once.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::kernel::{PendingPrompt, PromptAnswer, PromptEventReceiver, PromptKind};

/// Question line shown for a prompt
pub fn render_question(prompt: &PendingPrompt) -> String {
    let mut question = prompt.info.clone();
    if prompt.kind == PromptKind::YesNo {
        question.push_str(" [Y/N]");
    }
    if let Some(default) = &prompt.default {
        question.push_str(&format!(" (default: {})", default));
    }
    question.push_str(": ");
    question
}

/// Turn one line of input into an answer
///
/// Returns `None` when the question has to be asked again.
pub fn resolve_answer(
    kind: PromptKind,
    default: Option<&PromptAnswer>,
    input: &str,
) -> Option<PromptAnswer> {
    match kind {
        PromptKind::YesNo => {
            let input = input.trim();
            if input.eq_ignore_ascii_case("y") {
                Some(PromptAnswer::YesNo(true))
            } else if input.eq_ignore_ascii_case("n") {
                Some(PromptAnswer::YesNo(false))
            } else {
                default.cloned()
            }
        }
        PromptKind::Text => {
            if input.is_empty() {
                Some(
                    default
                        .cloned()
                        .unwrap_or_else(|| PromptAnswer::Text(String::new())),
                )
            } else {
                Some(PromptAnswer::Text(input.to_string()))
            }
        }
    }
}

/// Line-based question/answer loop over a terminal
pub struct PromptRelay<R, W> {
    input: R,
    output: W,
}

impl<R, W> PromptRelay<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Answer prompt requests until the core goes away or input ends
    ///
    /// `take_prompt` claims the pending prompt for a nonce.
    pub async fn run<F>(mut self, mut events: PromptEventReceiver, mut take_prompt: F) -> std::io::Result<()>
    where
        F: FnMut(&str) -> Option<PendingPrompt>,
    {
        while let Some(request) = events.recv().await {
            let Some(prompt) = take_prompt(&request.nonce) else {
                warn!("No pending prompt for nonce {}", request.nonce);
                continue;
            };

            match self.ask(&prompt).await? {
                Some(answer) => {
                    debug!("Prompt {} answered", prompt.nonce);
                    prompt.answer(answer);
                }
                None => {
                    match prompt.default.clone() {
                        Some(default) => prompt.answer(default),
                        None => warn!(
                            "Terminal input closed before prompt {} was answered",
                            prompt.nonce
                        ),
                    }
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Ask until the input resolves; `None` if input ended first
    pub async fn ask(&mut self, prompt: &PendingPrompt) -> std::io::Result<Option<PromptAnswer>> {
        let question = render_question(prompt);
        loop {
            self.output.write_all(question.as_bytes()).await?;
            self.output.flush().await?;

            let mut line = String::new();
            if self.input.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            let input = line.trim_end_matches(&['\r', '\n'][..]);
            if let Some(answer) = resolve_answer(prompt.kind, prompt.default.as_ref(), input) {
                return Ok(Some(answer));
            }
        }
    }
}
