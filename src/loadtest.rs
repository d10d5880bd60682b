// Load test module - multi-process GET flood against a running relay
//
// The parent launches one child per process slot (the current executable
// with `loadtest --child`) and waits for all of them. Each child fires
// `requests` concurrent GETs at the target and reports when they are done.
// Children are never restarted.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Target used when none is given on the command line
pub const DEFAULT_TARGET: &str = "http://10.191.31.203:9000";
pub const DEFAULT_REQUESTS: usize = 1000;

#[derive(Debug, Clone)]
pub struct LoadTestOptions {
    pub url: String,
    /// Concurrent requests per child
    pub requests: usize,
    pub processes: usize,
}

/// Outcome of one child's burst
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BurstSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Parent side: launch the children and log each exit
pub async fn run_parent(options: &LoadTestOptions) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate the current executable")?;

    println!(
        "Master process {} starting, creating {} worker processes...",
        std::process::id(),
        options.processes
    );

    let mut children = Vec::with_capacity(options.processes);
    for _ in 0..options.processes {
        let child = child_command(&exe, options)
            .spawn()
            .with_context(|| format!("Failed to launch {}", exe.display()))?;
        children.push(child);
    }

    let exits = children.into_iter().map(|mut child| async move {
        let pid = child.id();
        (pid, child.wait().await)
    });

    for (pid, status) in join_all(exits).await {
        let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
        match status {
            Ok(status) => {
                println!("Worker process {} exited", pid);
                tracing::info!("Load test child {} exited ({})", pid, status);
            }
            Err(e) => tracing::error!("Load test child {} could not be awaited: {}", pid, e),
        }
    }

    Ok(())
}

fn child_command(exe: &Path, options: &LoadTestOptions) -> Command {
    let mut command = Command::new(exe);
    command
        .arg("loadtest")
        .arg("--child")
        .arg("--url")
        .arg(&options.url)
        .arg("--requests")
        .arg(options.requests.to_string())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    command
}

/// Child side: one concurrent burst, then the completion line
pub async fn run_child(url: &str, requests: usize) -> Result<BurstSummary> {
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(requests)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create HTTP client")?;

    let started = Instant::now();
    let summary = burst(&client, url, requests).await;

    println!(
        "Process {} completed {} requests!",
        std::process::id(),
        requests
    );
    tracing::info!(
        "{} ok, {} failed in {:.2}s",
        summary.succeeded,
        summary.failed,
        started.elapsed().as_secs_f64()
    );

    Ok(summary)
}

async fn burst(client: &reqwest::Client, url: &str, requests: usize) -> BurstSummary {
    let pid = std::process::id();
    let results = join_all((0..requests).map(|_| async move {
        client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
    }))
    .await;

    let mut summary = BurstSummary::default();
    for result in results {
        match result {
            Ok(_) => summary.succeeded += 1,
            Err(e) => {
                eprintln!("Process {} request failed: {}", pid, e);
                summary.failed += 1;
            }
        }
    }
    summary
}
