//! The churn scheduler loop.
//!
//! `Running` admits work at the limiter's pace until the deadline passes or
//! the stop handle is set. Each admission draws the next identity, schedules
//! the retirement of the identity that just left the resident window, then
//! schedules the load of the new one. Retire and load are submitted in that
//! order but may complete in either order; the resident count can overshoot
//! the limit until the retire has run. `Draining` shuts the pool down within
//! the grace period, `Stopped` closes the shared connection.

use crate::config::ChurnConfig;
use crate::error::ChurnError;
use crate::identity::{IdentityCounter, IdentitySource, ResidentWindow};
use crate::limiter::RateLimiter;
use crate::pool::{ShutdownReport, WorkerPool};
use crate::session::SessionProvider;
use crate::task::{TaskStats, WorkUnit};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Draining,
    Stopped,
}

/// Destination for admitted work.
pub trait WorkSink {
    fn submit(&self, unit: WorkUnit) -> Result<(), ChurnError>;
}

/// Runs work units on a worker pool against the shared session provider.
pub struct PoolDispatcher<'a> {
    pool: &'a WorkerPool,
    sessions: Arc<SessionProvider>,
    stats: Arc<TaskStats>,
}

impl<'a> PoolDispatcher<'a> {
    pub fn new(
        pool: &'a WorkerPool,
        sessions: Arc<SessionProvider>,
        stats: Arc<TaskStats>,
    ) -> Self {
        Self {
            pool,
            sessions,
            stats,
        }
    }
}

impl WorkSink for PoolDispatcher<'_> {
    fn submit(&self, unit: WorkUnit) -> Result<(), ChurnError> {
        let sessions = Arc::clone(&self.sessions);
        let stats = Arc::clone(&self.stats);
        self.pool.submit(move || unit.run(&sessions, &stats))
    }
}

/// Ends the `Running` state early when set.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionTally {
    pub admitted: u64,
    pub retires_submitted: u64,
    /// Total time spent blocked on the limiter.
    pub throttled: Duration,
}

pub struct Scheduler {
    window: ResidentWindow,
    rows_per_table: u64,
    limiter: RateLimiter,
    identities: Arc<dyn IdentitySource>,
    stop: StopHandle,
    state: SchedulerState,
    history: Vec<SchedulerState>,
}

impl Scheduler {
    pub fn new(config: &ChurnConfig) -> Result<Self, ChurnError> {
        config.validate()?;
        Ok(Self {
            window: ResidentWindow::new(config.resident_table_limit),
            rows_per_table: config.rows_per_table,
            limiter: RateLimiter::new(config.ingestion_rate, config.burst_capacity)?,
            identities: Arc::new(IdentityCounter::new()),
            stop: StopHandle::default(),
            state: SchedulerState::Running,
            history: vec![SchedulerState::Running],
        })
    }

    pub fn with_identity_source(mut self, identities: Arc<dyn IdentitySource>) -> Self {
        self.identities = identities;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Every state entered so far, starting with `Running`.
    pub fn history(&self) -> &[SchedulerState] {
        &self.history
    }

    /// Admits work until `deadline` or a stop request, then enters
    /// `Draining`. Submission errors end admission early and are returned
    /// after the transition.
    pub fn admit_until(
        &mut self,
        deadline: Instant,
        sink: &dyn WorkSink,
    ) -> Result<AdmissionTally, ChurnError> {
        let mut tally = AdmissionTally::default();
        let result = if self.state == SchedulerState::Running {
            self.admission_loop(deadline, sink, &mut tally)
        } else {
            Ok(())
        };
        self.transition(SchedulerState::Draining);
        result.map(|()| tally)
    }

    fn admission_loop(
        &self,
        deadline: Instant,
        sink: &dyn WorkSink,
        tally: &mut AdmissionTally,
    ) -> Result<(), ChurnError> {
        while !self.stop.is_stopped() && Instant::now() < deadline {
            tally.throttled += self.limiter.acquire();
            let identity = self.identities.next_identity();
            if let Some(evicted) = self.window.evicted_by(identity) {
                sink.submit(WorkUnit::retire(evicted))?;
                tally.retires_submitted += 1;
            }
            sink.submit(WorkUnit::load(identity, self.rows_per_table))?;
            tally.admitted += 1;
        }
        Ok(())
    }

    /// Shuts the pool down within `timeout`. A timeout is reported, not
    /// raised; teardown continues regardless.
    pub fn drain(&mut self, pool: WorkerPool, timeout: Duration) -> ShutdownReport {
        if self.state == SchedulerState::Running {
            self.transition(SchedulerState::Draining);
        }
        pool.shutdown(timeout)
    }

    /// Closes the shared connection. Tasks abandoned by `drain` that have not
    /// opened their session yet will fail with `SessionUnavailable`.
    pub fn stop(&mut self, sessions: &SessionProvider) -> Result<(), ChurnError> {
        let closed = sessions.close();
        self.transition(SchedulerState::Stopped);
        closed
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state == next {
            return;
        }
        info!(from = ?self.state, to = ?next, "scheduler state change");
        if next == SchedulerState::Stopped && self.state == SchedulerState::Running {
            warn!("scheduler stopped without draining");
        }
        self.state = next;
        self.history.push(next);
    }
}
