//! Config serialization to TOML
//!
//! Single source of truth for the config file format.

use super::Config;

impl Config {
    /// Serialize config to a commented TOML template.
    ///
    /// The fallback credential is never written; it belongs in the
    /// environment (`SILICONFLOW_KEY`) or a `.env` file.
    pub fn to_toml(&self) -> String {
        format!(
            r#"# dsv3-relay configuration

# Address every worker binds to (all workers share the port)
bind_addr = {bind:?}

# Path the chat route is mounted under
route_prefix = {prefix:?}

# Environment name; "production" stops serving the browser helper script
environment = {environment:?}

# Directory for per-day chat logs (YYYY-MM-DD.log)
log_dir = {log_dir:?}

# Maximum request body size in bytes
body_limit_bytes = {body_limit}

[upstream]
url = {upstream_url:?}
model = {upstream_model:?}
# Bounds the connection attempt and the wait for response headers
timeout_secs = {upstream_timeout}
# api_key: set SILICONFLOW_KEY in the environment instead

[supervisor]
# Worker processes to keep alive. Left unset, every start uses the number
# of cores available at that moment.
# workers = {workers}
# Restart delay for crashing workers: immediate, fixed, exponential
backoff = "{backoff}"
backoff_initial_ms = {backoff_initial}
backoff_max_ms = {backoff_max}
# Uptime after which a worker's failure streak is forgotten
stable_after_secs = {stable_after}

# Diagnostic logging (RUST_LOG env var overrides level)
[logging]
level = {log_level:?}
file_enabled = {log_file_enabled}
file_dir = {log_file_dir:?}
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = {log_file_prefix:?}
"#,
            bind = self.bind_addr.to_string(),
            prefix = self.route_prefix,
            environment = self.environment,
            log_dir = self.log_dir.display().to_string(),
            body_limit = self.body_limit_bytes,
            upstream_url = self.upstream.url,
            upstream_model = self.upstream.model,
            upstream_timeout = self.upstream.timeout_secs,
            workers = self.supervisor.workers,
            backoff = self.supervisor.backoff.as_str(),
            backoff_initial = self.supervisor.backoff_initial_ms,
            backoff_max = self.supervisor.backoff_max_ms,
            stable_after = self.supervisor.stable_after_secs,
            log_level = self.logging.level,
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = self.logging.file_dir.display().to_string(),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = self.logging.file_prefix,
        )
    }
}
