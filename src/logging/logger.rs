//! Logger facade
//!
//! Accepts `(level, source, values)`, stamps the entry, and dispatches it to
//! the console and the rotating log file, each behind its own threshold. Every
//! entry also gives the compaction clock a chance to fire.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};

use super::compaction::LogCompactor;
use super::console::Console;
use super::file_writer::FileLogSink;
use super::level::LogLevel;
use super::rotation::RotationNamer;

/// Default time between two compaction passes
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Settings for building a [`Logger`]
#[derive(Debug, Clone)]
pub struct LoggerSettings {
    /// Directory holding the rotating log files (must exist)
    pub log_dir: PathBuf,
    /// Threshold for console output
    pub console_level: LogLevel,
    /// Threshold for file output
    pub file_level: LogLevel,
    /// Minimum time between compaction passes
    pub compaction_interval: Duration,
    /// Console destination
    pub console: Console,
}

impl LoggerSettings {
    /// Settings with the default thresholds (`info` console, `verbose` file)
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            console_level: LogLevel::Info,
            file_level: LogLevel::Verbose,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            console: Console::Stdout,
        }
    }
}

/// Dual-sink leveled logger
///
/// One instance per process, shared as `Arc<Logger>`. Owns the rotation state
/// and the compaction clock.
#[derive(Debug)]
pub struct Logger {
    log_dir: PathBuf,
    console_level: LogLevel,
    file_level: LogLevel,
    console: Console,
    rotation: RotationNamer,
    sink: FileLogSink,
    compactor: LogCompactor,
    compaction_interval: Duration,
    last_compressed_at: Mutex<Option<Instant>>,
}

impl Logger {
    /// Build the logger and claim a free log file name
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: LoggerSettings) -> Self {
        let rotation = RotationNamer::new();
        rotation.advance_split_if_taken(&settings.log_dir);

        Self {
            sink: FileLogSink::spawn(settings.console.clone()),
            log_dir: settings.log_dir,
            console_level: settings.console_level,
            file_level: settings.file_level,
            console: settings.console,
            rotation,
            compactor: LogCompactor::new(),
            compaction_interval: settings.compaction_interval,
            last_compressed_at: Mutex::new(None),
        }
    }

    /// Emit one entry
    ///
    /// The console line is written before this returns; the file line is
    /// queued and lands asynchronously.
    pub fn log(&self, level: LogLevel, source: &str, values: &[&dyn Display]) {
        self.log_text(level, source, &render_values(values));
    }

    /// Emit one entry whose values are already rendered
    pub fn log_text(&self, level: LogLevel, source: &str, text: &str) {
        if level == LogLevel::Silent {
            return;
        }
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        if self.console_level.admits(level) {
            self.console.write_entry(&timestamp, level, source, text);
        }

        if self.file_level.admits(level) {
            let path = self.log_dir.join(self.rotation.current_file_name());
            self.sink
                .append(path, format!("{} {} {} {}", timestamp, level.tag(), source, text));
        }

        self.maybe_compact(Instant::now());
    }

    pub fn critical(&self, source: &str, values: &[&dyn Display]) {
        self.log(LogLevel::Critical, source, values)
    }

    pub fn error(&self, source: &str, values: &[&dyn Display]) {
        self.log(LogLevel::Error, source, values)
    }

    pub fn warn(&self, source: &str, values: &[&dyn Display]) {
        self.log(LogLevel::Warn, source, values)
    }

    pub fn info(&self, source: &str, values: &[&dyn Display]) {
        self.log(LogLevel::Info, source, values)
    }

    pub fn debug(&self, source: &str, values: &[&dyn Display]) {
        self.log(LogLevel::Debug, source, values)
    }

    pub fn verbose(&self, source: &str, values: &[&dyn Display]) {
        self.log(LogLevel::Verbose, source, values)
    }

    /// Emitter table to hand to the core
    pub fn emitters(self: &Arc<Self>) -> LogEmitters {
        LogEmitters {
            logger: Arc::clone(self),
        }
    }

    /// Start a compaction pass if the interval has elapsed
    ///
    /// The clock is stamped when the pass is started, not when it finishes.
    /// Returns whether a pass was due.
    pub(crate) fn maybe_compact(&self, now: Instant) -> bool {
        let due = {
            let mut last = self
                .last_compressed_at
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match *last {
                Some(at) if now.saturating_duration_since(at) <= self.compaction_interval => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };

        if due {
            self.compactor
                .spawn(self.log_dir.clone(), self.rotation.current_file_name());
        }
        due
    }

    /// Wait until every file line emitted so far has been written
    pub async fn flush(&self) {
        self.sink.flush().await
    }

    /// Directory holding the log files
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the log file currently being written
    pub fn active_file(&self) -> PathBuf {
        self.log_dir.join(self.rotation.current_file_name())
    }

    pub fn console_level(&self) -> LogLevel {
        self.console_level
    }

    pub fn file_level(&self) -> LogLevel {
        self.file_level
    }
}

/// Join values the way they are printed in a log line
pub fn render_values(values: &[&dyn Display]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-level emit functions handed to the core
///
/// This is the only way the core produces log output, so the
/// `(source, values)` signature is a stable contract.
#[derive(Debug, Clone)]
pub struct LogEmitters {
    logger: Arc<Logger>,
}

impl LogEmitters {
    pub fn critical(&self, source: &str, values: &[&dyn Display]) {
        self.logger.critical(source, values)
    }

    pub fn error(&self, source: &str, values: &[&dyn Display]) {
        self.logger.error(source, values)
    }

    pub fn warn(&self, source: &str, values: &[&dyn Display]) {
        self.logger.warn(source, values)
    }

    pub fn info(&self, source: &str, values: &[&dyn Display]) {
        self.logger.info(source, values)
    }

    pub fn debug(&self, source: &str, values: &[&dyn Display]) {
        self.logger.debug(source, values)
    }

    pub fn verbose(&self, source: &str, values: &[&dyn Display]) {
        self.logger.verbose(source, values)
    }

    /// Emit at a level chosen at runtime
    pub fn emit(&self, level: LogLevel, source: &str, values: &[&dyn Display]) {
        self.logger.log(level, source, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::console::ConsoleCapture;
    use tempfile::TempDir;

    fn test_logger(dir: &Path, console_level: LogLevel, file_level: LogLevel) -> (Logger, ConsoleCapture) {
        let (console, capture) = Console::memory();
        let logger = Logger::new(LoggerSettings {
            log_dir: dir.to_path_buf(),
            console_level,
            file_level,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            console,
        });
        (logger, capture)
    }

    #[tokio::test]
    async fn test_thresholds_are_independent() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, capture) = test_logger(temp_dir.path(), LogLevel::Info, LogLevel::Debug);

        logger.info("core", &[&"visible everywhere"]);
        logger.debug("core", &[&"file only"]);
        logger.verbose("core", &[&"nowhere"]);
        logger.flush().await;

        let console = capture.lines();
        assert_eq!(console.len(), 1);
        assert!(console[0].ends_with("INFO core visible everywhere"));

        let file = std::fs::read_to_string(logger.active_file()).unwrap();
        let lines: Vec<&str> = file.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("INFO core visible everywhere"));
        assert!(lines[1].ends_with("DEBG core file only"));
    }

    #[tokio::test]
    async fn test_silent_thresholds_drop_everything() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, capture) = test_logger(temp_dir.path(), LogLevel::Silent, LogLevel::Silent);

        logger.critical("core", &[&"nobody hears this"]);
        logger.flush().await;

        assert!(capture.lines().is_empty());
        assert!(!logger.active_file().exists());
    }

    #[tokio::test]
    async fn test_file_lines_have_no_escape_codes() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, _capture) = test_logger(temp_dir.path(), LogLevel::Silent, LogLevel::Verbose);

        for level in LogLevel::EMITTABLE {
            logger.log(level, "cli", &[&"entry"]);
        }
        logger.flush().await;

        let file = std::fs::read_to_string(logger.active_file()).unwrap();
        assert_eq!(file.lines().count(), 6);
        assert!(!file.contains('\u{1b}'));
    }

    #[tokio::test]
    async fn test_values_are_joined_with_spaces() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, capture) = test_logger(temp_dir.path(), LogLevel::Verbose, LogLevel::Silent);

        logger.warn("core", &[&"retrying in", &5, &"seconds"]);
        assert!(capture.lines()[0].ends_with("WARN core retrying in 5 seconds"));
    }

    #[tokio::test]
    async fn test_timestamp_is_iso_8601() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, capture) = test_logger(temp_dir.path(), LogLevel::Info, LogLevel::Silent);

        logger.info("cli", &[&"tick"]);
        let line = capture.lines().remove(0);
        let timestamp = line.split(' ').next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert!(timestamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_new_logger_skips_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let (first, _) = test_logger(temp_dir.path(), LogLevel::Silent, LogLevel::Verbose);
        first.info("cli", &[&"first run"]);
        first.flush().await;

        let (second, _) = test_logger(temp_dir.path(), LogLevel::Silent, LogLevel::Verbose);
        assert_ne!(first.active_file(), second.active_file());
        assert!(!second.active_file().exists());
    }

    #[tokio::test]
    async fn test_compaction_is_gated_by_interval() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, _) = test_logger(temp_dir.path(), LogLevel::Silent, LogLevel::Silent);

        let start = Instant::now();
        assert!(logger.maybe_compact(start));
        assert!(!logger.maybe_compact(start + Duration::from_secs(60)));
        assert!(!logger.maybe_compact(start + DEFAULT_COMPACTION_INTERVAL));
        assert!(logger.maybe_compact(start + DEFAULT_COMPACTION_INTERVAL + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_first_entry_compacts_previous_runs() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("2000-1-1_1.log"), "ancient\n").unwrap();
        let (logger, _) = test_logger(temp_dir.path(), LogLevel::Silent, LogLevel::Verbose);

        logger.info("cli", &[&"hello"]);
        logger.flush().await;

        let packed = temp_dir.path().join("2000-1-1_1.log.zst");
        for _ in 0..100 {
            if packed.exists() && !temp_dir.path().join("2000-1-1_1.log").exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(packed.exists());
        assert!(!temp_dir.path().join("2000-1-1_1.log").exists());
        assert!(logger.active_file().exists());
    }

    #[tokio::test]
    async fn test_emitters_forward_to_logger() {
        let temp_dir = TempDir::new().unwrap();
        let (logger, capture) = test_logger(temp_dir.path(), LogLevel::Verbose, LogLevel::Silent);
        let emitters = Arc::new(logger).emitters();

        emitters.critical("core", &[&"c"]);
        emitters.error("core", &[&"e"]);
        emitters.warn("core", &[&"w"]);
        emitters.info("core", &[&"i"]);
        emitters.debug("core", &[&"d"]);
        emitters.verbose("core", &[&"v"]);
        emitters.emit(LogLevel::Silent, "core", &[&"never"]);

        let tags: Vec<String> = capture
            .lines()
            .iter()
            .map(|l| l.split(' ').nth(1).unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["CRIT", "ERR", "WARN", "INFO", "DEBG", "VERB"]);
    }
}
