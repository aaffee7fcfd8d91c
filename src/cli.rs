//! Command-line interface

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::Config;
use crate::logging::LogLevel;

#[derive(Debug, Parser)]
#[command(name = "nocom-cli")]
#[command(about = "Operational shell for a NOCOM_BOT core", long_about = None)]
#[command(version, disable_version_flag = true)]
pub struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,

    /// Profile directory holding logs and config.toml
    #[arg(short = 'u', long, env = "NOCOM_USER_DATA_DIR")]
    pub user_data_dir: Option<String>,

    /// Console log level
    #[arg(short = 'l', long, env = "NOCOM_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// File log level
    #[arg(short = 'g', long, env = "NOCOM_FILE_LOG_LEVEL")]
    pub file_log_level: Option<LogLevel>,

    /// Directory of the core to run
    #[arg(short = 'k', long, env = "NOCOM_CORE_DIR")]
    pub core_dir: Option<PathBuf>,
}

impl Cli {
    /// Console threshold: flag or env, then the profile's config
    pub fn console_level(&self, config: &Config) -> LogLevel {
        self.log_level.unwrap_or(config.log_level)
    }

    /// File threshold: flag or env, then the profile's config
    pub fn file_level(&self, config: &Config) -> LogLevel {
        self.file_log_level.unwrap_or(config.file_log_level)
    }

    /// The core directory, if one was given and exists
    pub fn existing_core_dir(&self) -> Option<&PathBuf> {
        self.core_dir.as_ref().filter(|dir| dir.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::try_parse_from([
            "nocom-cli", "-u", "/tmp/profile", "-l", "warn", "-g", "debug", "-k", "/opt/core",
        ])
        .unwrap();
        assert_eq!(cli.user_data_dir.as_deref(), Some("/tmp/profile"));
        assert_eq!(cli.log_level, Some(LogLevel::Warn));
        assert_eq!(cli.file_log_level, Some(LogLevel::Debug));
        assert_eq!(cli.core_dir, Some(PathBuf::from("/opt/core")));
    }

    #[test]
    fn test_long_flags() {
        let cli = Cli::try_parse_from([
            "nocom-cli",
            "--log-level",
            "silent",
            "--file-log-level",
            "verbose",
            "--core-dir",
            "core",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Silent));
        assert_eq!(cli.file_log_level, Some(LogLevel::Verbose));
    }

    #[test]
    fn test_invalid_level_is_usage_error() {
        let err = Cli::try_parse_from(["nocom-cli", "-l", "loud"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["nocom-cli", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn test_levels_fall_back_to_config() {
        let cli = Cli::try_parse_from(["nocom-cli", "-l", "error"]).unwrap();
        let config = Config {
            file_log_level: LogLevel::Info,
            ..Config::default()
        };
        assert_eq!(cli.console_level(&config), LogLevel::Error);
        assert_eq!(cli.file_level(&config), LogLevel::Info);
    }

    #[test]
    fn test_core_dir_must_exist() {
        let temp_dir = TempDir::new().unwrap();
        let core_dir = temp_dir.path().to_str().unwrap();
        let cli = Cli::try_parse_from(["nocom-cli", "-k", core_dir]).unwrap();
        assert!(cli.existing_core_dir().is_some());

        let cli = Cli::try_parse_from(["nocom-cli", "-k", "/definitely/not/here"]).unwrap();
        assert!(cli.existing_core_dir().is_none());
    }
}
