//! Worker supervision settings

use serde::Deserialize;
use std::time::Duration;

/// Restart delay strategy for crashed workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackoffKind {
    /// Relaunch right away, every time
    Immediate,
    /// Same delay for every rapid failure
    Fixed,
    /// Doubling delay per consecutive rapid failure, capped
    #[default]
    Exponential,
}

impl BackoffKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "immediate" | "none" => Self::Immediate,
            "fixed" => Self::Fixed,
            _ => Self::Exponential,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Fixed => "fixed",
            Self::Exponential => "exponential",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Number of worker processes to keep alive
    pub workers: usize,
    pub backoff: BackoffKind,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// A worker that ran at least this long resets its failure streak
    pub stable_after_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: available_cores(),
            backoff: BackoffKind::Exponential,
            backoff_initial_ms: 100,
            backoff_max_ms: 30_000,
            stable_after_secs: 10,
        }
    }
}

/// Supervisor settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileSupervisor {
    pub workers: Option<usize>,
    pub backoff: Option<String>,
    pub backoff_initial_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub stable_after_secs: Option<u64>,
}

impl SupervisorConfig {
    pub fn from_file(file: Option<FileSupervisor>, env_workers: Option<usize>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            workers: env_workers
                .or(file.workers)
                .filter(|&n| n > 0)
                .unwrap_or(defaults.workers),
            backoff: file
                .backoff
                .map(|s| BackoffKind::parse(&s))
                .unwrap_or(defaults.backoff),
            backoff_initial_ms: file.backoff_initial_ms.unwrap_or(defaults.backoff_initial_ms),
            backoff_max_ms: file.backoff_max_ms.unwrap_or(defaults.backoff_max_ms),
            stable_after_secs: file.stable_after_secs.unwrap_or(defaults.stable_after_secs),
        }
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }
}

/// Number of cores the OS lets this process use (at least 1)
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
