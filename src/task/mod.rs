pub mod load;
pub mod retire;

pub use load::{LoadReport, LoadTask};
pub use retire::RetireTask;

use crate::error::ChurnError;
use crate::identity::Identity;
use crate::session::SessionProvider;
use std::sync::atomic::{AtomicU64, Ordering};

/// Synthetic row generated from its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPayload {
    pub id: i64,
    pub message: String,
}

impl RowPayload {
    pub fn for_index(index: i64) -> Self {
        Self {
            id: index,
            message: format!("Hello, {index:09}!"),
        }
    }
}

/// A self-contained unit submitted to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkUnit {
    Load(LoadTask),
    Retire(RetireTask),
}

impl WorkUnit {
    pub fn load(identity: Identity, rows: u64) -> Self {
        WorkUnit::Load(LoadTask::new(identity, rows))
    }

    pub fn retire(identity: Identity) -> Self {
        WorkUnit::Retire(RetireTask::new(identity))
    }

    /// Runs the unit to completion. Failures are logged and counted here and
    /// never reach the caller.
    pub fn run(&self, sessions: &SessionProvider, stats: &TaskStats) {
        match self {
            WorkUnit::Load(task) => task.run(sessions, stats),
            WorkUnit::Retire(task) => task.run(sessions, stats),
        }
    }
}

#[derive(Debug, Default)]
pub struct TaskStats {
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    integrity_warnings: AtomicU64,
    retires_completed: AtomicU64,
    retires_failed: AtomicU64,
    sessions_unavailable: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStatsSnapshot {
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub integrity_warnings: u64,
    pub retires_completed: u64,
    pub retires_failed: u64,
    pub sessions_unavailable: u64,
}

impl TaskStatsSnapshot {
    pub fn failures(&self) -> u64 {
        self.loads_failed + self.retires_failed
    }
}

impl TaskStats {
    pub fn snapshot(&self) -> TaskStatsSnapshot {
        TaskStatsSnapshot {
            loads_completed: self.loads_completed.load(Ordering::Relaxed),
            loads_failed: self.loads_failed.load(Ordering::Relaxed),
            integrity_warnings: self.integrity_warnings.load(Ordering::Relaxed),
            retires_completed: self.retires_completed.load(Ordering::Relaxed),
            retires_failed: self.retires_failed.load(Ordering::Relaxed),
            sessions_unavailable: self.sessions_unavailable.load(Ordering::Relaxed),
        }
    }

    fn record_load(&self, outcome: &Result<LoadReport, ChurnError>) {
        match outcome {
            Ok(report) => {
                self.loads_completed.fetch_add(1, Ordering::Relaxed);
                if !report.is_intact() {
                    self.integrity_warnings.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                self.loads_failed.fetch_add(1, Ordering::Relaxed);
                self.note_unavailable(err);
            }
        }
    }

    fn record_retire(&self, outcome: &Result<(), ChurnError>) {
        match outcome {
            Ok(()) => {
                self.retires_completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.retires_failed.fetch_add(1, Ordering::Relaxed);
                self.note_unavailable(err);
            }
        }
    }

    fn note_unavailable(&self, err: &ChurnError) {
        if matches!(err, ChurnError::SessionUnavailable { .. }) {
            self.sessions_unavailable.fetch_add(1, Ordering::Relaxed);
        }
    }
}
