//! Upstream chat-completion endpoint settings

use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where chat requests are forwarded and with which fallback credential
#[derive(Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub model: String,
    /// Bounds the connection attempt and the wait for response headers
    pub timeout_secs: u64,
    /// Used when the caller supplies no `api_key`
    pub api_key: Option<String>,
}

// Hand-written so the credential never reaches a log line
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_UPSTREAM_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            api_key: None,
        }
    }
}

/// Upstream settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileUpstream {
    pub url: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
    pub api_key: Option<String>,
}

impl UpstreamConfig {
    /// Env values take precedence over the file section
    pub fn from_file(
        file: Option<FileUpstream>,
        env_url: Option<String>,
        env_model: Option<String>,
        env_key: Option<String>,
    ) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            url: env_url.or(file.url).unwrap_or(defaults.url),
            model: env_model.or(file.model).unwrap_or(defaults.model),
            timeout_secs: file.timeout_secs.unwrap_or(defaults.timeout_secs),
            api_key: env_key.or(file.api_key).filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
