//! Logging engine for the shell
//!
//! Provides a leveled logger with independent console and file thresholds,
//! date-based log file rotation with same-day splits, background compression
//! of retired log files, and a bridge from `tracing` events.

mod bridge;
mod compaction;
mod console;
mod file_writer;
mod level;
mod logger;
mod rotation;

pub use bridge::{init_tracing, LoggerLayer, SHELL_SOURCE};
pub use compaction::{
    compress_old_logs, compressed_path, CompactionReport, LogCompactor, COMPRESSED_SUFFIX,
};
pub use console::{render_line, Console, ConsoleCapture};
pub use file_writer::FileLogSink;
pub use level::{LogLevel, ParseLevelError};
pub use logger::{
    render_values, LogEmitters, Logger, LoggerSettings, DEFAULT_COMPACTION_INTERVAL,
};
pub use rotation::{RotationNamer, RotationState, ROTATION_SUFFIX};
