//! tracing integration
//!
//! The shell's own diagnostics are written with `tracing` macros. This layer
//! forwards every event into the [`Logger`], so they obey the same thresholds
//! and land in the same files as the core's output.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use super::level::LogLevel;
use super::logger::Logger;

/// Source name used for the shell's own entries
pub const SHELL_SOURCE: &str = "cli";

/// Layer that hands tracing events to the logger
pub struct LoggerLayer {
    logger: Arc<Logger>,
}

impl LoggerLayer {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for LoggerLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.logger.log_text(
            LogLevel::from(*metadata.level()),
            source_for_target(metadata.target()),
            &visitor.finish(),
        );
    }
}

/// Map a tracing target to a log source
fn source_for_target(target: &str) -> &str {
    let root = target.split("::").next().unwrap_or(target);
    match root {
        "nocom" | "nocom_cli" => SHELL_SOURCE,
        _ => root,
    }
}

/// Collects the message and any structured fields of an event
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the global tracing subscriber feeding `logger`
///
/// `RUST_LOG` narrows what reaches the logger; the logger's own thresholds
/// still apply afterwards.
pub fn init_tracing(logger: Arc<Logger>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "nocom=trace,nocom_cli=trace,warn".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(LoggerLayer::new(logger))
        .try_init()
        .context("Failed to install tracing subscriber")
}
