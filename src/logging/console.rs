//! Console sink
//!
//! Writes lines to stdout, colored only when stdout is a terminal, or records
//! plain lines in memory so the console rendering can be asserted on.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex, OnceLock};

use crossterm::style::Stylize;

use super::level::LogLevel;

/// Where console-rendered entries go
#[derive(Debug, Clone, Default)]
pub enum Console {
    /// Lines on the process stdout, colored on a terminal
    #[default]
    Stdout,
    /// Uncolored lines kept in memory
    Memory(ConsoleCapture),
}

impl Console {
    /// Create an in-memory console and a handle to read it back
    pub fn memory() -> (Self, ConsoleCapture) {
        let capture = ConsoleCapture::default();
        (Console::Memory(capture.clone()), capture)
    }

    /// Render one entry
    pub fn write_entry(&self, timestamp: &str, level: LogLevel, source: &str, text: &str) {
        match self {
            Console::Stdout => {
                let line = render_line(timestamp, level, source, text, stdout_is_terminal());
                // A closed stdout must not take the process down with it
                let _ = writeln!(io::stdout().lock(), "{}", line);
            }
            Console::Memory(capture) => {
                capture.push(render_line(timestamp, level, source, text, false));
            }
        }
    }
}

fn stdout_is_terminal() -> bool {
    static IS_TERMINAL: OnceLock<bool> = OnceLock::new();
    *IS_TERMINAL.get_or_init(|| io::stdout().is_terminal())
}

/// One console line; ANSI styling only when `colored`
pub fn render_line(timestamp: &str, level: LogLevel, source: &str, text: &str, colored: bool) -> String {
    if colored {
        format!(
            "{} {} {} {}",
            timestamp,
            level.styled_tag(),
            source.dark_magenta(),
            text
        )
    } else {
        format!("{} {} {} {}", timestamp, level.tag(), source, text)
    }
}

/// Shared buffer of console lines
#[derive(Debug, Clone, Default)]
pub struct ConsoleCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ConsoleCapture {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }

    /// All lines written so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}
