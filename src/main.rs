// dsv3-relay - multi-process streaming relay for DeepSeek-V3 chat completions
//
// Architecture:
// - Supervisor: launches one worker process per core and replaces any that exit
// - Worker (axum): validates chat requests and relays the upstream SSE stream
//   to the caller as plain text deltas
// - Storage: per-day JSON Lines chat logs shared by all workers
// - Load test: standalone multi-process GET flood
//
// Each worker runs a current-thread runtime; parallelism comes from processes.

mod cli;
mod config;
mod loadtest;
mod logging;
mod proxy;
mod startup;
mod storage;
mod supervisor;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{available_cores, Config};
use startup::RunMode;
use supervisor::{ExeLauncher, Supervisor};
use tokio::runtime::{Builder, Runtime};
use tracing::Instrument;

fn main() -> Result<()> {
    // Variables already set in the environment win over .env
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Some(Commands::Config { show, reset, path }) = cli.command {
        return cli::handle_config(show, reset, path);
    }

    if cli.command.is_none() {
        // Helps users discover options; workers read the same file
        Config::ensure_config_exists();
    }

    let config = Config::from_env()?;
    let _log_guard = logging::init(&config.logging);

    match cli.command {
        None => run_supervisor(config),
        Some(Commands::Serve) => run_single(config),
        Some(Commands::Worker) => run_worker(config),
        Some(Commands::Loadtest {
            url,
            requests,
            processes,
            child,
        }) => {
            let runtime = current_thread()?;
            if child {
                runtime.block_on(loadtest::run_child(&url, requests))?;
                Ok(())
            } else {
                let options = loadtest::LoadTestOptions {
                    url,
                    requests,
                    processes: processes.filter(|&n| n > 0).unwrap_or_else(available_cores),
                };
                runtime.block_on(loadtest::run_parent(&options))
            }
        }
        Some(Commands::Config { .. }) => Ok(()),
    }
}

fn current_thread() -> Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")
}

fn run_supervisor(config: Config) -> Result<()> {
    let mode = RunMode::Supervised {
        workers: config.supervisor.workers,
    };
    startup::print_startup(&config, mode);
    startup::log_startup(&config, mode);

    let launcher = ExeLauncher::current()?;
    let supervisor = Supervisor::from_config(launcher, &config.supervisor);

    current_thread()?.block_on(supervisor.run(proxy::shutdown_signal()))
}

fn run_single(config: Config) -> Result<()> {
    startup::print_startup(&config, RunMode::Single);
    startup::log_startup(&config, RunMode::Single);

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(proxy::start_relay(config, proxy::shutdown_signal()))
}

fn run_worker(config: Config) -> Result<()> {
    let slot = std::env::var("DSV3_WORKER_SLOT").unwrap_or_else(|_| "-".to_string());
    let span = tracing::info_span!("worker", pid = std::process::id(), slot = %slot);

    current_thread()?.block_on(
        proxy::start_relay(config, proxy::shutdown_signal()).instrument(span),
    )
}
