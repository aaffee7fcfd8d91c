//! Core running as a child process
//!
//! The child speaks the line protocol from [`protocol`](super::protocol) on
//! its stdin/stdout; its stderr is passed through to the terminal.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::protocol::{self, CoreMessage, ShellMessage};
use super::{
    Core, CoreError, CoreSignal, CoreSignalReceiver, PendingPrompt, PromptEventReceiver,
    PromptRequest, PromptTable,
};
use crate::logging::{LogEmitters, LogLevel};

/// Environment variable carrying the profile directory to the core
pub const PROFILE_DIR_ENV: &str = "NOCOM_PROFILE_DIR";

/// How long `stop` waits for the core's stdout to close once the child is gone
///
/// Grandchildren that inherited the pipe can keep it open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How to launch a process core
#[derive(Debug, Clone)]
pub struct CoreLaunch {
    /// Name used as log source for unattributed output
    pub name: String,
    /// Program to run
    pub program: PathBuf,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory of the child
    pub working_dir: PathBuf,
    /// How long `stop` waits before killing the child
    pub stop_grace: Duration,
}

/// A running child and the tasks attached to its pipes
struct Running {
    child: Child,
    commands: mpsc::UnboundedSender<ShellMessage>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Core implemented by an external program
pub struct ProcessCore {
    launch: CoreLaunch,
    profile_dir: PathBuf,
    emitters: LogEmitters,
    prompts: PromptTable,
    prompt_tx: mpsc::UnboundedSender<PromptRequest>,
    prompt_rx: Mutex<Option<PromptEventReceiver>>,
    signal_tx: mpsc::UnboundedSender<CoreSignal>,
    signal_rx: Mutex<Option<CoreSignalReceiver>>,
    stopping: Arc<AtomicBool>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl ProcessCore {
    /// Construct the core; nothing is spawned until [`Core::start`]
    pub fn new(launch: CoreLaunch, profile_dir: &Path, emitters: LogEmitters) -> Self {
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Self {
            launch,
            profile_dir: profile_dir.to_path_buf(),
            emitters,
            prompts: PromptTable::new(),
            prompt_tx,
            prompt_rx: Mutex::new(Some(prompt_rx)),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            stopping: Arc::new(AtomicBool::new(false)),
            running: tokio::sync::Mutex::new(None),
        }
    }

    fn spawn_child(&self) -> Result<Child, CoreError> {
        Command::new(&self.launch.program)
            .args(&self.launch.args)
            .current_dir(&self.launch.working_dir)
            .env(PROFILE_DIR_ENV, &self.profile_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(CoreError::Spawn)
    }
}

#[async_trait]
impl Core for ProcessCore {
    fn name(&self) -> &str {
        &self.launch.name
    }

    async fn start(&self) -> Result<(), CoreError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        self.stopping.store(false, Ordering::Release);

        let mut child = self.spawn_child()?;
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(CoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "core pipes unavailable",
                )));
            }
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let writer = tokio::spawn(write_commands(stdin, command_rx));
        let reader = tokio::spawn(read_messages(
            stdout,
            MessageRouter {
                name: self.launch.name.clone(),
                emitters: self.emitters.clone(),
                prompts: self.prompts.clone(),
                prompt_tx: self.prompt_tx.clone(),
                signal_tx: self.signal_tx.clone(),
                commands: commands.clone(),
                stopping: Arc::clone(&self.stopping),
                ready: Some(ready_tx),
            },
        ));

        let _ = commands.send(ShellMessage::Start);
        let outcome = ready_rx
            .await
            .unwrap_or(Err(CoreError::ExitedBeforeStart));

        if let Err(e) = outcome {
            let _ = child.start_kill();
            reader.abort();
            writer.abort();
            return Err(e);
        }

        *running = Some(Running {
            child,
            commands,
            reader,
            writer,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), CoreError> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        self.stopping.store(true, Ordering::Release);
        let _ = running.commands.send(ShellMessage::Stop);

        match tokio::time::timeout(self.launch.stop_grace, running.child.wait()).await {
            Ok(Ok(status)) => debug!("Core exited with {}", status),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(
                    "Core did not exit within {:?}, killing it",
                    self.launch.stop_grace
                );
                running.child.kill().await?;
            }
        }

        drop(running.commands);
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut running.reader)
            .await
            .is_err()
        {
            warn!("Core output still open after exit, detaching from it");
            running.reader.abort();
        }
        running.writer.abort();
        Ok(())
    }

    fn take_prompt_events(&self) -> Option<PromptEventReceiver> {
        self.prompt_rx.lock().ok()?.take()
    }

    fn take_lifecycle_signals(&self) -> Option<CoreSignalReceiver> {
        self.signal_rx.lock().ok()?.take()
    }

    fn take_prompt(&self, nonce: &str) -> Option<PendingPrompt> {
        self.prompts.take(nonce)
    }
}

async fn write_commands(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<ShellMessage>) {
    while let Some(message) = rx.recv().await {
        let line = match protocol::encode(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not encode message for core: {}", e);
                continue;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!("Core stdin closed: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!("Core stdin closed: {}", e);
            break;
        }
    }
}

/// Dispatches messages read from the core
struct MessageRouter {
    name: String,
    emitters: LogEmitters,
    prompts: PromptTable,
    prompt_tx: mpsc::UnboundedSender<PromptRequest>,
    signal_tx: mpsc::UnboundedSender<CoreSignal>,
    commands: mpsc::UnboundedSender<ShellMessage>,
    stopping: Arc<AtomicBool>,
    ready: Option<oneshot::Sender<Result<(), CoreError>>>,
}

impl MessageRouter {
    fn handle_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let message = match protocol::decode(line) {
            Ok(message) => message,
            Err(_) => {
                self.emitters.info(&self.name, &[&line]);
                return;
            }
        };

        match message {
            CoreMessage::Log {
                level,
                source,
                values,
            } => {
                let level = level.parse().unwrap_or(LogLevel::Warn);
                let source = source.unwrap_or_else(|| self.name.clone());
                let rendered: Vec<String> = values.iter().map(protocol::render_value).collect();
                let refs: Vec<&dyn std::fmt::Display> =
                    rendered.iter().map(|v| v as &dyn std::fmt::Display).collect();
                self.emitters.emit(level, &source, &refs);
            }
            CoreMessage::Prompt {
                nonce,
                info,
                kind,
                default,
            } => {
                let commands = self.commands.clone();
                let answer_nonce = nonce.clone();
                self.prompts.insert(PendingPrompt::new(
                    nonce.clone(),
                    info,
                    kind,
                    default,
                    Box::new(move |value| {
                        let _ = commands.send(ShellMessage::Answer {
                            nonce: answer_nonce,
                            value,
                        });
                    }),
                ));
                let _ = self.prompt_tx.send(PromptRequest { nonce });
            }
            CoreMessage::Started => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Ok(()));
                }
                let _ = self.signal_tx.send(CoreSignal::Started);
            }
            CoreMessage::StartFailed { reason } => {
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(CoreError::StartFailed(reason)));
                } else {
                    warn!("Core reported a start failure after starting: {}", reason);
                }
            }
            CoreMessage::Stopped { restart } => {
                let _ = self.signal_tx.send(CoreSignal::Stopped { restart });
            }
        }
    }

    /// The core's stdout closed
    fn finish(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(Err(CoreError::ExitedBeforeStart));
            return;
        }
        if !self.stopping.load(Ordering::Acquire) {
            warn!("Core exited unexpectedly");
            let _ = self.signal_tx.send(CoreSignal::Stopped { restart: false });
        }
    }
}

async fn read_messages(stdout: ChildStdout, mut router: MessageRouter) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => router.handle_line(&line),
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read from core: {}", e);
                break;
            }
        }
    }
    router.finish();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::kernel::PromptAnswer;
    use crate::logging::{Console, ConsoleCapture, Logger, LoggerSettings};
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("core.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn test_core(dir: &Path, body: &str) -> (ProcessCore, ConsoleCapture) {
        test_core_with_grace(dir, body, Duration::from_secs(5))
    }

    fn test_core_with_grace(
        dir: &Path,
        body: &str,
        stop_grace: Duration,
    ) -> (ProcessCore, ConsoleCapture) {
        let (console, capture) = Console::memory();
        let mut settings = LoggerSettings::new(dir);
        settings.console_level = LogLevel::Verbose;
        settings.file_level = LogLevel::Silent;
        settings.console = console;
        let emitters = Arc::new(Logger::new(settings)).emitters();

        let launch = CoreLaunch {
            name: "testcore".to_string(),
            program: write_script(dir, body),
            args: vec![],
            working_dir: dir.to_path_buf(),
            stop_grace,
        };
        (ProcessCore::new(launch, dir, emitters), capture)
    }

    async fn wait_for(capture: &ConsoleCapture, needle: &str) -> bool {
        for _ in 0..200 {
            if capture.contains(needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_prompt_and_stop() {
        let temp_dir = TempDir::new().unwrap();
        let (core, capture) = test_core(
            temp_dir.path(),
            r#"read cmd
echo '{"type":"started"}'
echo '{"type":"log","level":"info","source":"kernel","values":["booted",42]}'
echo "profile $NOCOM_PROFILE_DIR"
echo '{"type":"prompt","nonce":"n1","info":"Continue?","kind":"yes_no","default":true}'
read answer
echo "$answer"
read cmd
exit 0
"#,
        );

        let mut prompts = core.take_prompt_events().unwrap();
        assert!(core.take_prompt_events().is_none());
        let mut signals = core.take_lifecycle_signals().unwrap();

        core.start().await.unwrap();
        assert_eq!(signals.recv().await, Some(CoreSignal::Started));

        let request = prompts.recv().await.unwrap();
        assert_eq!(request.nonce, "n1");
        let prompt = core.take_prompt("n1").unwrap();
        assert_eq!(prompt.default, Some(PromptAnswer::YesNo(true)));
        prompt.answer(PromptAnswer::YesNo(false));

        assert!(wait_for(&capture, r#""nonce":"n1","value":false"#).await);
        assert!(capture.contains("INFO kernel booted 42"));
        assert!(capture.contains("INFO testcore profile"));

        core.stop().await.unwrap();
        // Orderly exit is not reported as a core-initiated stop
        assert!(signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_exit_before_start_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (core, _) = test_core(temp_dir.path(), "exit 3\n");

        let err = core.start().await.unwrap_err();
        assert!(matches!(err, CoreError::ExitedBeforeStart));
    }

    #[tokio::test]
    async fn test_reported_start_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (core, _) = test_core(
            temp_dir.path(),
            "read cmd\necho '{\"type\":\"start_failed\",\"reason\":\"no token\"}'\nsleep 5\n",
        );

        match core.start().await {
            Err(CoreError::StartFailed(reason)) => assert_eq!(reason, "no token"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unexpected_exit_signals_stop() {
        let temp_dir = TempDir::new().unwrap();
        let (core, _) = test_core(
            temp_dir.path(),
            "read cmd\necho '{\"type\":\"started\"}'\nexit 0\n",
        );
        let mut signals = core.take_lifecycle_signals().unwrap();

        core.start().await.unwrap();
        assert_eq!(signals.recv().await, Some(CoreSignal::Started));
        assert_eq!(
            signals.recv().await,
            Some(CoreSignal::Stopped { restart: false })
        );
        core.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_kills_unresponsive_core() {
        let temp_dir = TempDir::new().unwrap();
        let (console, _) = Console::memory();
        let mut settings = LoggerSettings::new(temp_dir.path());
        settings.console = console;
        let emitters = Arc::new(Logger::new(settings)).emitters();
        let launch = CoreLaunch {
            name: "stubborn".to_string(),
            program: write_script(
                temp_dir.path(),
                "read cmd\necho '{\"type\":\"started\"}'\nwhile true; do sleep 1; done\n",
            ),
            args: vec![],
            working_dir: temp_dir.path().to_path_buf(),
            stop_grace: Duration::from_millis(200),
        };
        let core = ProcessCore::new(launch, temp_dir.path(), emitters);

        core.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), core.stop())
            .await
            .expect("stop should not hang")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_bounded_when_grandchild_holds_output() {
        let temp_dir = TempDir::new().unwrap();
        let (core, _) = test_core_with_grace(
            temp_dir.path(),
            "read cmd\necho '{\"type\":\"started\"}'\nsleep 30 &\nwhile true; do sleep 1; done\n",
            Duration::from_millis(200),
        );

        core.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), core.stop())
            .await
            .expect("stop must not wait on a grandchild's pipe")
            .unwrap();
    }

    #[tokio::test]
    async fn test_clean_exit_with_lingering_grandchild() {
        let temp_dir = TempDir::new().unwrap();
        let (core, _) = test_core(
            temp_dir.path(),
            "read cmd\necho '{\"type\":\"started\"}'\nsleep 30 &\nread cmd\nexit 0\n",
        );
        let mut signals = core.take_lifecycle_signals().unwrap();

        core.start().await.unwrap();
        assert_eq!(signals.recv().await, Some(CoreSignal::Started));
        tokio::time::timeout(Duration::from_secs(5), core.stop())
            .await
            .expect("stop must not wait on a grandchild's pipe")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let (core, _) = test_core(temp_dir.path(), "exit 0\n");
        core.stop().await.unwrap();
    }
}
