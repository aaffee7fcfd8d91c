//! OS signals and uncaught panics

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::logging::{LogLevel, Logger, SHELL_SOURCE};

/// Operator request to shut down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// SIGINT / Ctrl-C; a second one forces the exit
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::Interrupt => write!(f, "interrupt"),
            ShutdownTrigger::Terminate => write!(f, "terminate"),
        }
    }
}

pub type ShutdownTriggerSender = mpsc::UnboundedSender<ShutdownTrigger>;
pub type ShutdownTriggerReceiver = mpsc::UnboundedReceiver<ShutdownTrigger>;

/// Create the channel carrying shutdown triggers to the orchestrator
pub fn shutdown_channel() -> (ShutdownTriggerSender, ShutdownTriggerReceiver) {
    mpsc::unbounded_channel()
}

/// Forward SIGINT/SIGTERM as shutdown triggers
///
/// Installing the handlers replaces the default "terminate immediately"
/// behavior for the rest of the process.
#[cfg(unix)]
pub fn forward_os_signals(tx: ShutdownTriggerSender) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let trigger = tokio::select! {
                Some(()) = interrupt.recv() => ShutdownTrigger::Interrupt,
                Some(()) = terminate.recv() => ShutdownTrigger::Terminate,
                else => break,
            };
            debug!("Received {} signal", trigger);
            if tx.send(trigger).is_err() {
                break;
            }
        }
    }))
}

/// Forward Ctrl-C as shutdown triggers
#[cfg(not(unix))]
pub fn forward_os_signals(tx: ShutdownTriggerSender) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("Received Ctrl-C");
            if tx.send(ShutdownTrigger::Interrupt).is_err() {
                break;
            }
        }
    }))
}

/// Route panics through the logger at critical severity
///
/// A panic inside a spawned task only ends that task; the process keeps
/// running with the failure on record.
pub fn install_panic_hook(logger: Arc<Logger>) {
    std::panic::set_hook(Box::new(move |info| {
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        let location = info
            .location()
            .map(|l| format!("at {}:{}", l.file(), l.line()))
            .unwrap_or_default();

        logger.log(
            LogLevel::Critical,
            SHELL_SOURCE,
            &[&"Uncaught panic:", &payload, &location],
        );
    }));
}
