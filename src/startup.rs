// Startup module - banner printed by the supervisor (or a lone `serve`)
//
// Shows version, config file status and the effective settings an operator
// most often needs to double-check: route, workers, backoff, log locations.

use crate::config::{Config, VERSION};
use crate::supervisor::BackoffPolicy;

/// ANSI color codes for terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const MAGENTA: &str = "\x1b[35m";
}

/// How this process is going to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Supervised { workers: usize },
    Single,
}

impl RunMode {
    fn describe(&self) -> String {
        match self {
            RunMode::Supervised { workers } => format!("{workers} workers (supervised)"),
            RunMode::Single => "single worker".to_string(),
        }
    }
}

pub fn print_startup(config: &Config, mode: RunMode) {
    use colors::*;

    println!();
    println!("  {BOLD}{CYAN}dsv3-relay{RESET} {DIM}v{VERSION}{RESET}");
    println!("  {DIM}Streaming chat relay for DeepSeek-V3{RESET}");
    println!();

    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("  {DIM}Config:{RESET} {GREEN}✓{RESET} {}", path.display());
        } else {
            println!("  {DIM}Config:{RESET} {DIM}(using defaults){RESET}");
        }
    }
    println!();

    for (name, value) in settings(config, mode) {
        println!("    {DIM}{name:<12}{RESET} {value}");
    }
    println!();

    println!(
        "  {MAGENTA}▸{RESET} Relay on {BOLD}http://{}{}{RESET}",
        config.bind_addr, config.route_prefix
    );
    if config.upstream.api_key.is_none() {
        println!("  {YELLOW}▸{RESET} {YELLOW}SILICONFLOW_KEY not set{RESET} {DIM}(callers must send api_key){RESET}");
    }
    println!();
}

/// Same information as one log line, for the trace files
pub fn log_startup(config: &Config, mode: RunMode) {
    let summary = settings(config, mode)
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(
        "dsv3-relay v{} on {}{} {}",
        VERSION,
        config.bind_addr,
        config.route_prefix,
        summary
    );
}

fn settings(config: &Config, mode: RunMode) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("mode", mode.describe()),
        ("environment", config.environment.clone()),
        ("upstream", config.upstream.url.clone()),
        ("model", config.upstream.model.clone()),
        ("chat logs", config.log_dir.display().to_string()),
    ];

    if let RunMode::Supervised { .. } = mode {
        rows.insert(
            1,
            (
                "backoff",
                BackoffPolicy::from_config(&config.supervisor).describe(),
            ),
        );
    }
    if config.serve_client {
        rows.push(("client", crate::proxy::server::CLIENT_ASSET_PATH.to_string()));
    }
    if config.logging.file_enabled {
        rows.push(("trace logs", config.logging.file_dir.display().to_string()));
    }

    rows
}
