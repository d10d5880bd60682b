// Storage module - per-day chat logs in JSON Lines format
//
// Every request leaves an INPUT record, then either one OUTPUT record (full
// reconstructed text) or one or more ERROR records. Records go to
// <log_dir>/YYYY-MM-DD.log, the date taken from the record's UTC timestamp.
// Example: jq 'select(.kind == "OUTPUT") | .response' logs/2025-03-01.log
//
// Several worker processes append to the same file. Each record is written
// with a single write on an O_APPEND handle, so lines from different
// processes never interleave; inside one process a mutex serializes writers.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogKind {
    Input,
    Output,
    Error,
}

/// One line in a daily log file. Never mutated after it is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub kind: LogKind,
    pub timestamp: DateTime<Utc>,
    /// Correlates the records of one request (pid-sequence)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Messages exactly as the caller sent them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<serde_json::Value>,
    /// Reconstructed assistant text (full on OUTPUT, partial on some ERRORs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error taxonomy: invalid_request_error, upstream_error, stream_error, ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl LogRecord {
    pub fn input(messages: Option<serde_json::Value>) -> Self {
        Self {
            kind: LogKind::Input,
            timestamp: Utc::now(),
            request_id: None,
            messages,
            response: None,
            error: None,
            error_type: None,
        }
    }

    pub fn output(messages: serde_json::Value, response: String) -> Self {
        Self {
            kind: LogKind::Output,
            timestamp: Utc::now(),
            request_id: None,
            messages: Some(messages),
            response: Some(response),
            error: None,
            error_type: None,
        }
    }

    pub fn error(error: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            timestamp: Utc::now(),
            request_id: None,
            messages: None,
            response: None,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
        }
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    /// Attach the text relayed so far (for errors after streaming began)
    pub fn with_partial_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }
}

/// Append-only writer for the per-day log files
#[derive(Debug)]
pub struct DailyLog {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DailyLog {
    /// Create the log directory if it doesn't exist
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        Ok(Self {
            log_dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the file holding records for `date`
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("{}.log", date.format("%Y-%m-%d")))
    }

    /// Append a record. Failures are reported and swallowed so a full disk
    /// never breaks request handling.
    pub fn append(&self, record: &LogRecord) {
        if let Err(e) = self.try_append(record) {
            tracing::error!("Failed to write {:?} log record: {:#}", record.kind, e);
        }
    }

    fn try_append(&self, record: &LogRecord) -> Result<()> {
        let path = self.path_for(record.timestamp.date_naive());

        let mut line = serde_json::to_string(record).context("Failed to serialize record")?;
        line.push('\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        file.write_all(line.as_bytes())
            .context("Failed to write to log file")?;

        Ok(())
    }
}
