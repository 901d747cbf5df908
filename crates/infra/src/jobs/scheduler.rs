//! Interval scheduler for periodic tasks.
//!
//! Each task gets its own tokio task ticking on a fixed interval (first run
//! immediately). A run that overruns its interval delays the next tick instead
//! of triggering a burst of catch-up runs. Shutdown sets the shared
//! [`CancellationFlag`] and waits for in-flight runs to wind down.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::CancellationFlag;

/// Result of one task run, as far as the scheduler cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Clean,
    /// Ran to completion but found something an operator should see.
    Findings(String),
    Failed(String),
}

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run_once(&self, cancel: &CancellationFlag) -> RunOutcome;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStats {
    pub runs: u64,
    pub clean: u64,
    pub with_findings: u64,
    pub failed: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Per-task counters, keyed by task name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub tasks: BTreeMap<&'static str, TaskStats>,
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<(Arc<dyn PeriodicTask>, Duration)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every(mut self, interval: Duration, task: Arc<dyn PeriodicTask>) -> Self {
        self.tasks.push((task, interval));
        self
    }

    /// Start every registered task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cancel = CancellationFlag::new();
        let stats = Arc::new(Mutex::new(SchedulerStats::default()));

        let joins = self
            .tasks
            .into_iter()
            .map(|(task, interval)| {
                let shutdown = shutdown_rx.clone();
                let cancel = cancel.clone();
                let stats = Arc::clone(&stats);
                tokio::spawn(task_loop(task, interval, shutdown, cancel, stats))
            })
            .collect();

        SchedulerHandle {
            shutdown: shutdown_tx,
            cancel,
            joins,
            stats,
        }
    }
}

async fn task_loop(
    task: Arc<dyn PeriodicTask>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    cancel: CancellationFlag,
    stats: Arc<Mutex<SchedulerStats>>,
) {
    let name = task.name();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(task = name, interval_secs = every.as_secs(), "scheduled task started");

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if cancel.is_cancelled() {
            break;
        }

        let outcome = task.run_once(&cancel).await;
        match &outcome {
            RunOutcome::Clean => info!(task = name, "scheduled run clean"),
            RunOutcome::Findings(summary) => warn!(task = name, %summary, "scheduled run reported findings"),
            RunOutcome::Failed(reason) => error!(task = name, %reason, "scheduled run failed"),
        }
        record(&stats, name, outcome);
    }

    info!(task = name, "scheduled task stopped");
}

fn record(stats: &Mutex<SchedulerStats>, name: &'static str, outcome: RunOutcome) {
    let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
    let entry = stats.tasks.entry(name).or_default();
    entry.runs += 1;
    entry.last_run_at = Some(Utc::now());
    match outcome {
        RunOutcome::Clean => entry.clean += 1,
        RunOutcome::Findings(_) => entry.with_findings += 1,
        RunOutcome::Failed(reason) => {
            entry.failed += 1;
            entry.last_error = Some(reason);
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    cancel: CancellationFlag,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<SchedulerStats>>,
}

impl SchedulerHandle {
    pub fn stats(&self) -> SchedulerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Cancel in-flight runs and wait for every task loop to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.shutdown.send(true);
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "scheduled task panicked");
            }
        }
    }
}
