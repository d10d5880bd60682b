// Supervisor module - keeps one relay worker per slot alive
//
// The supervisor owns a fixed set of slots. Each slot holds at most one
// worker process; a monitor task per process waits for it to exit and reports
// back over a channel. When a worker exits (any code or signal) the slot is
// refilled, after a delay chosen by the BackoffPolicy from the slot's streak
// of rapid failures.
//
// State per slot: STARTING -> LISTENING -> EXITED -> (delay) -> STARTING
// The supervisor only sees launch and exit; the worker logs when it listens.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{BackoffKind, SupervisorConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Backoff
// ─────────────────────────────────────────────────────────────────────────────

/// Restart delay as a function of a slot's consecutive rapid failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Immediate,
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl BackoffPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        let initial = Duration::from_millis(config.backoff_initial_ms);
        match config.backoff {
            BackoffKind::Immediate => Self::Immediate,
            BackoffKind::Fixed => Self::Fixed(initial),
            BackoffKind::Exponential => Self::Exponential {
                initial,
                max: Duration::from_millis(config.backoff_max_ms).max(initial),
            },
        }
    }

    /// Delay before relaunching a slot whose streak is `failures`.
    ///
    /// A streak of zero (the worker had been stable) restarts immediately.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        match *self {
            Self::Immediate => Duration::ZERO,
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Immediate => "immediate".to_string(),
            Self::Fixed(d) => format!("fixed {}ms", d.as_millis()),
            Self::Exponential { initial, max } => {
                format!("exponential {}ms..{}ms", initial.as_millis(), max.as_millis())
            }
        }
    }
}

/// Streak after a worker exits: reset by a stable run, otherwise extended
fn next_streak(streak: u32, ran_for: Duration, stable_after: Duration) -> u32 {
    if ran_for >= stable_after {
        0
    } else {
        streak.saturating_add(1)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Launchers
// ─────────────────────────────────────────────────────────────────────────────

/// Starts the process for one slot
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self, slot: usize) -> Result<Child>;
}

/// Re-runs the current executable with the hidden `worker` subcommand.
///
/// Workers inherit the environment, so they resolve the same configuration.
pub struct ExeLauncher {
    exe: PathBuf,
}

impl ExeLauncher {
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot locate the current executable")?;
        Ok(Self { exe })
    }
}

impl WorkerLauncher for ExeLauncher {
    fn launch(&self, slot: usize) -> Result<Child> {
        Command::new(&self.exe)
            .arg("worker")
            .env("DSV3_WORKER_SLOT", slot.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to launch {}", self.exe.display()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// Published on every launch and exit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Workers currently running
    pub live: usize,
    /// Launches since start, including replacements
    pub spawned: u64,
    /// Exits observed
    pub exits: u64,
}

enum SlotEvent {
    Exited {
        slot: usize,
        pid: Option<u32>,
        status: std::io::Result<ExitStatus>,
        ran_for: Duration,
    },
    Relaunch {
        slot: usize,
    },
}

struct RunningWorker {
    kill: oneshot::Sender<()>,
    monitor: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    worker: Option<RunningWorker>,
    streak: u32,
}

pub struct Supervisor<L> {
    launcher: L,
    workers: usize,
    policy: BackoffPolicy,
    stable_after: Duration,
    status: watch::Sender<SupervisorStatus>,
}

impl<L: WorkerLauncher> Supervisor<L> {
    pub fn new(launcher: L, workers: usize, policy: BackoffPolicy, stable_after: Duration) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::default());
        Self {
            launcher,
            workers: workers.max(1),
            policy,
            stable_after,
            status,
        }
    }

    pub fn from_config(launcher: L, config: &SupervisorConfig) -> Self {
        Self::new(
            launcher,
            config.workers,
            BackoffPolicy::from_config(config),
            config.stable_after(),
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    /// Fill every slot, keep them filled until `shutdown` resolves, then kill
    /// every worker and wait for it.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut slots: Vec<Slot> = (0..self.workers).map(|_| Slot::default()).collect();

        tracing::info!(
            "Supervisor {} starting {} workers (backoff: {})",
            std::process::id(),
            self.workers,
            self.policy.describe()
        );

        for (index, slot) in slots.iter_mut().enumerate() {
            self.fill(index, slot, &events_tx);
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = events_rx.recv() => match event {
                    SlotEvent::Exited { slot, pid, status, ran_for } => {
                        self.on_exit(slot, &mut slots[slot], pid, status, ran_for, &events_tx);
                    }
                    SlotEvent::Relaunch { slot } => {
                        if slots[slot].worker.is_none() {
                            self.fill(slot, &mut slots[slot], &events_tx);
                        }
                    }
                },
            }
        }

        tracing::info!("Supervisor shutting down, stopping workers");
        let monitors: Vec<JoinHandle<()>> = slots
            .iter_mut()
            .filter_map(|slot| slot.worker.take())
            .map(|worker| {
                let _ = worker.kill.send(());
                worker.monitor
            })
            .collect();
        for monitor in monitors {
            let _ = monitor.await;
        }

        self.status.send_modify(|s| s.live = 0);
        let status = *self.status.borrow();
        tracing::info!(
            "All workers stopped ({} launched, {} exits)",
            status.spawned,
            status.exits
        );
        Ok(())
    }

    /// Launch a worker into an empty slot; a failed launch counts as a rapid
    /// failure and is retried after the backoff delay.
    fn fill(&self, index: usize, slot: &mut Slot, events: &mpsc::UnboundedSender<SlotEvent>) {
        match self.launcher.launch(index) {
            Ok(child) => {
                let pid = child.id();
                tracing::info!("Worker {} started in slot {}", display_pid(pid), index);
                slot.worker = Some(monitor(index, child, events.clone()));
                self.status.send_modify(|s| {
                    s.live += 1;
                    s.spawned += 1;
                });
            }
            Err(e) => {
                slot.streak = slot.streak.saturating_add(1);
                let delay = self.policy.delay(slot.streak).max(Duration::from_millis(100));
                tracing::error!(
                    "Slot {} launch failed: {:#}; retrying in {}ms",
                    index,
                    e,
                    delay.as_millis()
                );
                schedule_relaunch(index, delay, events.clone());
            }
        }
    }

    fn on_exit(
        &self,
        index: usize,
        slot: &mut Slot,
        pid: Option<u32>,
        status: std::io::Result<ExitStatus>,
        ran_for: Duration,
        events: &mpsc::UnboundedSender<SlotEvent>,
    ) {
        slot.worker = None;
        self.status.send_modify(|s| {
            s.live = s.live.saturating_sub(1);
            s.exits += 1;
        });

        slot.streak = next_streak(slot.streak, ran_for, self.stable_after);
        let delay = self.policy.delay(slot.streak);

        let status = match status {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        };
        tracing::warn!(
            "Worker {} exited ({}) after {:.1}s; restarting slot {} in {}ms ({} live)",
            display_pid(pid),
            status,
            ran_for.as_secs_f64(),
            index,
            delay.as_millis(),
            self.status.borrow().live
        );

        if delay.is_zero() {
            self.fill(index, slot, events);
        } else {
            schedule_relaunch(index, delay, events.clone());
        }
    }
}

/// Own the child until it exits or is told to die, then report the exit
fn monitor(slot: usize, mut child: Child, events: mpsc::UnboundedSender<SlotEvent>) -> RunningWorker {
    let (kill, kill_rx) = oneshot::channel::<()>();
    let pid = child.id();
    let started = Instant::now();

    let monitor = tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => match child.kill().await {
                Ok(()) => child.wait().await,
                Err(e) => Err(e),
            },
        };
        // The receiver is gone once the supervisor is shutting down
        let _ = events.send(SlotEvent::Exited {
            slot,
            pid,
            status,
            ran_for: started.elapsed(),
        });
    });

    RunningWorker { kill, monitor }
}

fn schedule_relaunch(slot: usize, delay: Duration, events: mpsc::UnboundedSender<SlotEvent>) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(SlotEvent::Relaunch { slot });
    });
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
}
