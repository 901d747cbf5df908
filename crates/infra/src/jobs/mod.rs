//! Background jobs: nightly reconciliation and backup freshness checks.
//!
//! Jobs never run inside a request. The [`scheduler`] drives them on fixed
//! intervals and hands each run a [`CancellationFlag`] that is set on
//! shutdown; a job checks it between units of work and reports a cancelled
//! run instead of stopping half way through one.

pub mod reconciliation;
pub mod scheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use reconciliation::ReconciliationJob;
pub use scheduler::{PeriodicTask, RunOutcome, Scheduler, SchedulerHandle, SchedulerStats, TaskStats};

/// Cooperative cancellation shared between a job and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
