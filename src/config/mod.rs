//! Configuration for the relay
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/dsv3-relay/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod observability;
mod serialization;
mod supervisor;
mod upstream;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use observability::{LogRotation, LoggingConfig};
pub use supervisor::{available_cores, BackoffKind, SupervisorConfig};
pub use upstream::UpstreamConfig;

use observability::FileLogging;
use supervisor::FileSupervisor;
use upstream::FileUpstream;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment name that turns off the companion client asset
pub const PRODUCTION_ENV: &str = "production";

const DEFAULT_BIND: &str = "127.0.0.1:9000";
const DEFAULT_ROUTE_PREFIX: &str = "/api/dsv3";
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address every worker binds to (shared port)
    pub bind_addr: SocketAddr,

    /// Path the chat route is mounted under
    pub route_prefix: String,

    /// Deployment environment name ("development", "production", ...)
    pub environment: String,

    /// Serve the browser helper script next to the chat route
    pub serve_client: bool,

    /// Directory for the per-day chat logs
    pub log_dir: PathBuf,

    /// Maximum accepted request body
    pub body_limit_bytes: usize,

    /// Upstream chat-completion endpoint
    pub upstream: UpstreamConfig,

    /// Worker supervision settings
    pub supervisor: SupervisorConfig,

    /// Diagnostic logging (tracing) settings
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            serve_client: true,
            log_dir: PathBuf::from("./logs"),
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            upstream: UpstreamConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub route_prefix: Option<String>,
    pub environment: Option<String>,
    pub serve_client: Option<bool>,
    pub log_dir: Option<String>,
    pub body_limit_bytes: Option<usize>,

    /// Optional [upstream] section
    pub upstream: Option<FileUpstream>,

    /// Optional [supervisor] section
    pub supervisor: Option<FileSupervisor>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/dsv3-relay/config.toml
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("dsv3-relay").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // config is optional
            }
        }

        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Read and parse the config file. A missing file yields defaults; a file
    /// that exists but does not parse is an error.
    fn load_file_config() -> Result<FileConfig> {
        let Some(path) = Self::config_path() else {
            return Ok(FileConfig::default());
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => {
                Err(e).with_context(|| format!("Cannot read config file {}", path.display()))
            }
        }
    }

    /// Load configuration: env vars -> file -> defaults
    pub fn from_env() -> Result<Self> {
        let file = Self::load_file_config()?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file config with environment lookups.
    ///
    /// `env` is injected so tests can resolve without touching process state.
    pub(crate) fn resolve<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind = env("DSV3_BIND")
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {bind}"))?;

        let route_prefix = normalize_prefix(
            &env("DSV3_ROUTE_PREFIX")
                .or(file.route_prefix)
                .unwrap_or_else(|| DEFAULT_ROUTE_PREFIX.to_string()),
        );

        let environment = env("DSV3_ENV")
            .or(file.environment)
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        // An explicit file value wins; otherwise only production hides the asset
        let serve_client = file
            .serve_client
            .unwrap_or_else(|| !environment.eq_ignore_ascii_case(PRODUCTION_ENV));

        let log_dir = env("DSV3_LOG_DIR")
            .or(file.log_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./logs"));

        let body_limit_bytes = file.body_limit_bytes.unwrap_or(DEFAULT_BODY_LIMIT);

        let upstream = UpstreamConfig::from_file(
            file.upstream,
            env("DSV3_UPSTREAM_URL"),
            env("DSV3_MODEL"),
            env("SILICONFLOW_KEY"),
        );

        let workers_override = env("DSV3_WORKERS")
            .map(|v| {
                v.parse::<usize>()
                    .with_context(|| format!("Invalid DSV3_WORKERS value: {v}"))
            })
            .transpose()?;
        let supervisor = SupervisorConfig::from_file(file.supervisor, workers_override);

        let logging = LoggingConfig::from_file(file.logging);

        Ok(Self {
            bind_addr,
            route_prefix,
            environment,
            serve_client,
            log_dir,
            body_limit_bytes,
            upstream,
            supervisor,
            logging,
        })
    }
}

/// Ensure a leading slash and no trailing slash ("/" stays "/")
fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
