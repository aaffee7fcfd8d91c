//! Configuration and profile layout
//!
//! A profile directory holds everything the shell writes:
//!
//! ```text
//! {profile}/
//!   config.toml   optional shell settings
//!   logs/         rotating log files
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogLevel;

/// Profile used when none is given on the command line
pub const DEFAULT_PROFILE_DIR: &str = "~/.nocom/profile_alpha0";

/// Name of the optional settings file inside a profile
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors loading the profile configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Categories of disk errors for user-friendly messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Get a user-friendly message for this error kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "disk full or quota exceeded",
            DiskErrorKind::PermissionDenied => "permission denied",
            DiskErrorKind::NotFound => "file or directory not found",
            DiskErrorKind::Other => "I/O error",
        }
    }
}

/// Categorize an IO error into a user-friendly category
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,

        // Check raw OS error for disk full on Unix
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    // ENOSPC = 28 on Linux and macOS
                    // EDQUOT = 122 on Linux, 69 on macOS
                    if os_error == 28 || os_error == 122 || os_error == 69 {
                        return DiskErrorKind::DiskFull;
                    }
                    // EACCES
                    if os_error == 13 {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Create a user-friendly error message from an IO error
pub fn friendly_io_error_message(e: &std::io::Error, context: &str) -> String {
    match categorize_io_error(e) {
        DiskErrorKind::Other => format!("{}: {}", context, e),
        kind => format!("{}: {} ({})", context, kind.user_message(), e),
    }
}

/// Shell settings read from `{profile}/config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Console log threshold
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// File log threshold
    #[serde(default = "default_file_log_level")]
    pub file_log_level: LogLevel,

    /// Seconds between two compressions of retired log files (default: 300 = 5 min)
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval_secs: u64,

    /// Delay before exiting after the core failed to start, so the last lines flush
    #[serde(default = "default_start_failure_delay")]
    pub start_failure_delay_ms: u64,

    /// How long a stopping core may take to exit before it is killed
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_file_log_level() -> LogLevel {
    LogLevel::Verbose
}

fn default_compaction_interval() -> u64 {
    300 // 5 minutes
}

fn default_start_failure_delay() -> u64 {
    500
}

fn default_stop_grace() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            file_log_level: default_file_log_level(),
            compaction_interval_secs: default_compaction_interval(),
            start_failure_delay_ms: default_start_failure_delay(),
            stop_grace_secs: default_stop_grace(),
        }
    }
}

impl Config {
    /// Load the profile's configuration, or defaults if it has none
    pub fn load(profile: &Profile) -> Result<Self, ConfigError> {
        Self::load_from(&profile.config_file_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }

    pub fn start_failure_delay(&self) -> Duration {
        Duration::from_millis(self.start_failure_delay_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// A user data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    root: PathBuf,
}

impl Profile {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Profile from a command-line value, or the default profile
    pub fn from_arg(arg: Option<&str>) -> std::io::Result<Self> {
        let raw = arg.unwrap_or(DEFAULT_PROFILE_DIR);
        Ok(Self::new(resolve_path(raw)?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path to the config file
    pub fn config_file_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Get the path to the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Ensure the profile and its logs directory exist
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.logs_dir())
    }
}

/// Expand `~` and make `raw` absolute against the current directory
pub fn resolve_path(raw: &str) -> std::io::Result<PathBuf> {
    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    if expanded.starts_with("~") {
        // No home directory to expand against
        tracing::warn!("Could not determine home directory, resolving {} locally", raw);
        let stripped = expanded.strip_prefix("~").unwrap_or(&expanded).to_path_buf();
        return Ok(std::env::current_dir()?.join(stripped));
    }
    Ok(std::env::current_dir()?.join(expanded))
}
