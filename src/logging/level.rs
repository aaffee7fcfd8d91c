//! Severity levels and their console decoration
//!
//! Levels are ordered from `Silent` (admits nothing) to `Verbose` (admits
//! everything). A sink configured with threshold `T` accepts an entry at
//! level `L` iff `T.rank() >= L.rank()`.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use crossterm::style::{StyledContent, Stylize};
use serde::{Deserialize, Serialize};

/// Log severity, also used as a sink threshold
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    /// Threshold only: disables a sink
    Silent,
    Critical,
    Error,
    Warn,
    Info,
    Debug,
    Verbose,
}

impl LogLevel {
    /// Every level an entry can be emitted at (all but `Silent`)
    pub const EMITTABLE: [LogLevel; 6] = [
        LogLevel::Critical,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Verbose,
    ];

    /// Numeric rank, `silent = -1` through `verbose = 5`
    pub fn rank(&self) -> i8 {
        match self {
            LogLevel::Silent => -1,
            LogLevel::Critical => 0,
            LogLevel::Error => 1,
            LogLevel::Warn => 2,
            LogLevel::Info => 3,
            LogLevel::Debug => 4,
            LogLevel::Verbose => 5,
        }
    }

    /// Lowercase name, as accepted on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Silent => "silent",
            LogLevel::Critical => "critical",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
        }
    }

    /// Whether a sink with this threshold accepts an entry at `level`
    pub fn admits(&self, level: LogLevel) -> bool {
        level != LogLevel::Silent && self.rank() >= level.rank()
    }

    /// Fixed-width tag used in both console and file lines
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Silent => "    ",
            LogLevel::Critical => "CRIT",
            LogLevel::Error => "ERR ",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBG",
            LogLevel::Verbose => "VERB",
        }
    }

    /// Colored tag for console output
    pub fn styled_tag(&self) -> StyledContent<&'static str> {
        let tag = self.tag();
        match self {
            LogLevel::Critical => tag.white().on_red().bold(),
            LogLevel::Error => tag.red().bold(),
            LogLevel::Warn => tag.dark_yellow().bold(),
            LogLevel::Info => tag.dark_green().bold(),
            LogLevel::Debug => tag.dark_blue().bold(),
            LogLevel::Verbose => tag.dark_grey().bold(),
            LogLevel::Silent => tag.stylize(),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a level name is not recognized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}' (expected silent, critical, error, warn, info, debug or verbose)")]
pub struct ParseLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(LogLevel::Silent),
            "critical" | "crit" => Ok(LogLevel::Critical),
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Verbose,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order_matches_declaration_order() {
        let mut previous = LogLevel::Silent;
        for level in LogLevel::EMITTABLE {
            assert!(level > previous);
            assert_eq!(level.rank(), previous.rank() + 1);
            previous = level;
        }
    }

    #[test]
    fn test_warn_threshold() {
        let threshold = LogLevel::Warn;
        assert!(threshold.admits(LogLevel::Critical));
        assert!(threshold.admits(LogLevel::Error));
        assert!(threshold.admits(LogLevel::Warn));
        assert!(!threshold.admits(LogLevel::Info));
        assert!(!threshold.admits(LogLevel::Debug));
        assert!(!threshold.admits(LogLevel::Verbose));
    }

    #[test]
    fn test_silent_and_verbose_thresholds() {
        for level in LogLevel::EMITTABLE {
            assert!(!LogLevel::Silent.admits(level));
            assert!(LogLevel::Verbose.admits(level));
        }
        // Silent is never an emit level
        assert!(!LogLevel::Verbose.admits(LogLevel::Silent));
    }

    #[test]
    fn test_parse_level() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("CRITICAL".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert_eq!(" Verbose ".parse::<LogLevel>().unwrap(), LogLevel::Verbose);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_tags_are_fixed_width() {
        for level in LogLevel::EMITTABLE {
            assert_eq!(level.tag().len(), 4);
        }
    }

    #[test]
    fn test_from_tracing_level() {
        assert_eq!(LogLevel::from(tracing::Level::TRACE), LogLevel::Verbose);
        assert_eq!(LogLevel::from(tracing::Level::ERROR), LogLevel::Error);
    }

    #[test]
    fn test_level_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let parsed: Wrapper = toml::from_str("level = \"debug\"").unwrap();
        assert_eq!(parsed.level, LogLevel::Debug);
    }
}
