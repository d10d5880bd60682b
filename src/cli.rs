// CLI module - command-line argument parsing and handlers
//
// No subcommand runs the supervisor. The other entry points:
// - serve: one in-process worker, no supervisor
// - worker: what the supervisor launches (hidden)
// - loadtest: multi-process GET flood against a running relay
// - config --show|--path|--reset: configuration file management

use crate::config::{Config, VERSION};
use crate::loadtest::{DEFAULT_REQUESTS, DEFAULT_TARGET};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;

/// Streaming chat relay for DeepSeek-V3
#[derive(Parser, Debug)]
#[command(name = "dsv3-relay")]
#[command(version = VERSION)]
#[command(about = "Multi-process streaming relay for DeepSeek-V3 chat completions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run a single relay worker in this process
    Serve,

    /// Run as a supervised worker
    #[command(hide = true)]
    Worker,

    /// Flood a relay with concurrent GET requests from several processes
    Loadtest {
        /// Target URL
        #[arg(long, default_value = DEFAULT_TARGET)]
        url: String,

        /// Concurrent requests per process
        #[arg(long, default_value_t = DEFAULT_REQUESTS)]
        requests: usize,

        /// Number of processes (defaults to the core count)
        #[arg(long)]
        processes: Option<usize>,

        /// Run one burst in this process
        #[arg(long, hide = true)]
        child: bool,
    },

    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Handle the config subcommand
pub fn handle_config(show: bool, reset: bool, path: bool) -> Result<()> {
    if path {
        let path = Config::config_path().context("Could not determine config path")?;
        println!("{}", path.display());
    } else if show {
        handle_config_show()?;
    } else if reset {
        handle_config_reset()?;
    } else {
        println!("Usage: dsv3-relay config [--show|--reset|--path]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --reset   Reset config file to defaults");
        println!("  --path    Show config file path");
    }
    Ok(())
}

fn handle_config_show() -> Result<()> {
    let config = Config::from_env()?;

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());
    println!(
        "# api_key: {}",
        if config.upstream.api_key.is_some() {
            "set"
        } else {
            "not set"
        }
    );

    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
    Ok(())
}

fn handle_config_reset() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;

    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error creating directory {}", parent.display()))?;
    }

    std::fs::write(&path, Config::default().to_toml())
        .with_context(|| format!("Error writing config {}", path.display()))?;

    println!("Config reset to defaults: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_runs_supervisor() {
        let cli = Cli::try_parse_from(["dsv3-relay"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn test_loadtest_defaults() {
        let cli = Cli::try_parse_from(["dsv3-relay", "loadtest"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Loadtest {
                url: DEFAULT_TARGET.to_string(),
                requests: DEFAULT_REQUESTS,
                processes: None,
                child: false,
            })
        );
    }

    #[test]
    fn test_loadtest_overrides() {
        let cli = Cli::try_parse_from([
            "dsv3-relay",
            "loadtest",
            "--url",
            "http://127.0.0.1:9000",
            "--requests",
            "10",
            "--processes",
            "2",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Loadtest { requests: 10, processes: Some(2), .. })
        ));
    }

    #[test]
    fn test_hidden_worker_still_parses() {
        let cli = Cli::try_parse_from(["dsv3-relay", "worker"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Worker));
    }
}
