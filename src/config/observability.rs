//! Diagnostic logging configuration
//!
//! Separate from the per-day chat logs: this controls the `tracing` output of
//! the supervisor and the workers.

use serde::Deserialize;
use std::path::PathBuf;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// How often the trace file rolls over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl LogRotation {
    const ALL: [LogRotation; 3] = [Self::Hourly, Self::Daily, Self::Never];

    /// Case-insensitive; anything unrecognized rolls daily
    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|rotation| rotation.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Never => "never",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Level for this crate's targets when RUST_LOG is unset
    pub level: String,
    pub file_enabled: bool,
    /// Where JSON trace files go (not the chat logs)
    pub file_dir: PathBuf,
    pub file_rotation: LogRotation,
    /// "dsv3-relay" gives files like "dsv3-relay.2025-01-15"
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs/trace"),
            file_rotation: LogRotation::Daily,
            file_prefix: "dsv3-relay".to_string(),
        }
    }
}

/// `[logging]` section of the config file
#[derive(Debug, Deserialize, Default)]
pub struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_rotation: Option<String>,
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn from_file(file: Option<FileLogging>) -> Self {
        let FileLogging {
            level,
            file_enabled,
            file_dir,
            file_rotation,
            file_prefix,
        } = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            level: level
                .as_deref()
                .and_then(known_level)
                .map(str::to_string)
                .unwrap_or(defaults.level),
            file_enabled: file_enabled.unwrap_or(defaults.file_enabled),
            file_dir: file_dir.map(PathBuf::from).unwrap_or(defaults.file_dir),
            file_rotation: file_rotation
                .as_deref()
                .map(LogRotation::parse)
                .unwrap_or(defaults.file_rotation),
            file_prefix: file_prefix
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.file_prefix),
        }
    }
}

/// Lower-cased level name, if it is one tracing knows
fn known_level(level: &str) -> Option<&'static str> {
    let level = level.trim();
    LEVELS
        .into_iter()
        .find(|known| known.eq_ignore_ascii_case(level))
}
