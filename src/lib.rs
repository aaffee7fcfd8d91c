//! nocom-cli - operational shell for a NOCOM_BOT core
//!
//! The shell loads an externally supplied core, logs on its behalf to the
//! console and to rotating, compressed log files, relays its terminal prompts,
//! and drives its start/stop lifecycle from OS signals.

pub mod cli;
pub mod config;
pub mod kernel;
pub mod lifecycle;
pub mod logging;
pub mod prompt;
