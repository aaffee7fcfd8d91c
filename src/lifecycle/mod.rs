//! Core lifecycle orchestration
//!
//! Starts the core, keeps it running until an operator signal or the core
//! itself asks for shutdown, and runs the shutdown sequence:
//!
//! ```text
//! NotStarted -> Starting -> Running -> Stopping -> Stopped
//!                  \
//!                   -> Failed
//! ```
//!
//! A second interrupt while stopping skips the graceful path.

mod signals;

pub use signals::{
    forward_os_signals, install_panic_hook, shutdown_channel, ShutdownTrigger,
    ShutdownTriggerReceiver, ShutdownTriggerSender,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::kernel::{Core, CoreSignal, CoreSignalReceiver};
use crate::logging::{LogLevel, Logger, SHELL_SOURCE};
use crate::prompt::PromptRelay;

/// Lifecycle of the shell around the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// The core failed to start
    Failed,
}

impl LifecycleState {
    pub fn display_name(&self) -> &str {
        match self {
            LifecycleState::NotStarted => "Not started",
            LifecycleState::Starting => "Starting",
            LifecycleState::Running => "Running",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Failed => "Failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// How the process ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The core stopped cleanly
    Graceful,
    /// A second interrupt cut the shutdown short
    Forced,
    /// The core could not be located or constructed
    LoadFailed,
    /// The core's start failed
    StartFailed,
    /// No usable core directory was given
    MissingCore,
}

impl Exit {
    /// Process exit code
    pub fn code(&self) -> i32 {
        match self {
            Exit::Graceful | Exit::Forced => 0,
            Exit::LoadFailed | Exit::StartFailed => 1,
            Exit::MissingCore => 2,
        }
    }
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Pause after a start failure so the last log lines reach the disk
    pub start_failure_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            start_failure_delay: Duration::from_millis(500),
        }
    }
}

type PromptInput = Box<dyn AsyncBufRead + Unpin + Send>;
type PromptOutput = Box<dyn AsyncWrite + Unpin + Send>;

/// Drives one core from start to shutdown
pub struct Orchestrator {
    core: Arc<dyn Core>,
    logger: Arc<Logger>,
    settings: OrchestratorSettings,
    prompt_io: Option<(PromptInput, PromptOutput)>,
    state: watch::Sender<LifecycleState>,
}

impl Orchestrator {
    pub fn new(core: Arc<dyn Core>, logger: Arc<Logger>, settings: OrchestratorSettings) -> Self {
        let (state, _) = watch::channel(LifecycleState::NotStarted);
        Self {
            core,
            logger,
            settings,
            prompt_io: None,
            state,
        }
    }

    /// Relay the core's prompts over this terminal
    ///
    /// Without it (no interactive terminal) prompt requests are not subscribed to.
    pub fn with_prompt_io<R, W>(mut self, input: R, output: W) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.prompt_io = Some((Box::new(input), Box::new(output)));
        self
    }

    /// Watch lifecycle state changes
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    fn set_state(&self, state: LifecycleState) {
        debug!("Lifecycle: {}", state);
        self.state.send_replace(state);
    }

    /// Run the core until shutdown and report how the process should exit
    pub async fn run(mut self, mut triggers: ShutdownTriggerReceiver) -> Exit {
        let relay = self.spawn_prompt_relay();
        let mut signals = self.core.take_lifecycle_signals();

        self.set_state(LifecycleState::Starting);
        let core = Arc::clone(&self.core);
        let start = core.start();
        tokio::pin!(start);

        // Shutdown requested before abort exists; honored once start resolves
        let mut abort_requested = false;
        let started = loop {
            tokio::select! {
                result = &mut start => break result,
                Some(trigger) = triggers.recv() => {
                    if abort_requested && trigger == ShutdownTrigger::Interrupt {
                        warn!("Second interrupt received while starting, exiting immediately");
                        return Exit::Forced;
                    }
                    info!("Received {} while the core is starting, stopping once it is up", trigger);
                    abort_requested = true;
                }
                Some(signal) = next_signal(&mut signals) => {
                    if signal == (CoreSignal::Stopped { restart: false }) {
                        info!("Core requested shutdown while starting");
                        abort_requested = true;
                    } else {
                        self.log_core_signal(signal);
                    }
                }
            }
        };

        if let Err(e) = started {
            self.set_state(LifecycleState::Failed);
            self.logger.log(
                LogLevel::Critical,
                SHELL_SOURCE,
                &[&"Failed to start core:", &e],
            );
            if let Some(relay) = relay {
                relay.abort();
            }
            self.logger.flush().await;
            tokio::time::sleep(self.settings.start_failure_delay).await;
            return Exit::StartFailed;
        }

        self.set_state(LifecycleState::Running);
        info!("Core {} is running", self.core.name());

        if !abort_requested {
            loop {
                tokio::select! {
                    Some(trigger) = triggers.recv() => {
                        info!("Received {}, shutting down", trigger);
                        break;
                    }
                    Some(signal) = next_signal(&mut signals) => {
                        if signal == (CoreSignal::Stopped { restart: false }) {
                            info!("Core requested shutdown");
                            break;
                        }
                        self.log_core_signal(signal);
                    }
                }
            }
        }

        self.abort(triggers, relay).await
    }

    /// Graceful shutdown; consumes the orchestrator so it runs at most once
    async fn abort(self, mut triggers: ShutdownTriggerReceiver, relay: Option<JoinHandle<()>>) -> Exit {
        self.set_state(LifecycleState::Stopping);

        let stop = self.core.stop();
        tokio::pin!(stop);
        loop {
            tokio::select! {
                result = &mut stop => {
                    if let Err(e) = result {
                        self.logger.log(
                            LogLevel::Error,
                            SHELL_SOURCE,
                            &[&"Core did not stop cleanly:", &e],
                        );
                    }
                    break;
                }
                Some(trigger) = triggers.recv() => match trigger {
                    ShutdownTrigger::Interrupt => {
                        warn!("Second interrupt received, exiting without waiting for the core");
                        return Exit::Forced;
                    }
                    ShutdownTrigger::Terminate => debug!("Already shutting down"),
                },
            }
        }

        if let Some(relay) = relay {
            relay.abort();
        }
        self.set_state(LifecycleState::Stopped);
        info!("Core stopped");
        self.logger.flush().await;
        Exit::Graceful
    }

    fn log_core_signal(&self, signal: CoreSignal) {
        match signal {
            CoreSignal::Started => info!("Core signalled start"),
            CoreSignal::Stopped { restart: true } => info!("Core is restarting"),
            CoreSignal::Stopped { restart: false } => {
                debug!("Core signalled stop, shutdown already pending")
            }
        }
    }

    /// Subscribe the prompt relay if a terminal was attached
    fn spawn_prompt_relay(&mut self) -> Option<JoinHandle<()>> {
        let (input, output) = self.prompt_io.take()?;
        let events = self.core.take_prompt_events()?;
        let core = Arc::clone(&self.core);
        let logger = Arc::clone(&self.logger);

        Some(tokio::spawn(async move {
            let relay = PromptRelay::new(input, output);
            if let Err(e) = relay.run(events, move |nonce| core.take_prompt(nonce)).await {
                logger.log(
                    LogLevel::Critical,
                    SHELL_SOURCE,
                    &[&"Prompt relay failed:", &e],
                );
            }
        }))
    }
}

/// Next lifecycle signal, or never once the source is gone
async fn next_signal(signals: &mut Option<CoreSignalReceiver>) -> Option<CoreSignal> {
    match signals {
        Some(rx) => match rx.recv().await {
            Some(signal) => Some(signal),
            None => {
                *signals = None;
                std::future::pending().await
            }
        },
        None => std::future::pending().await,
    }
}
