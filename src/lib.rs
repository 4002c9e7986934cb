pub mod config;
pub mod duration;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod pool;
pub mod probe;
pub mod scheduler;
pub mod session;
pub mod task;

use crate::config::ChurnConfig;
use crate::duration::{deadline_after, format_iso8601};
use crate::error::ChurnError;
use crate::pool::{ShutdownReport, WorkerPool};
use crate::probe::{ProbeSummary, ResourceProbe};
use crate::scheduler::{PoolDispatcher, Scheduler, SchedulerState, StopHandle};
use crate::session::SessionProvider;
use crate::task::{TaskStats, TaskStatsSnapshot};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const WORKER_THREAD_PREFIX: &str = "background";

/// Drives one bounded-churn run against a fresh in-memory DuckDB instance.
pub struct ChurnHarness {
    config: ChurnConfig,
    stop: StopHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub admitted: u64,
    pub retires_submitted: u64,
    pub states: Vec<SchedulerState>,
    pub shutdown: ShutdownReport,
    pub tasks: TaskStatsSnapshot,
    pub probe: ProbeSummary,
}

impl RunSummary {
    fn log(&self) {
        info!(
            elapsed = %format_iso8601(Duration::from_millis(self.elapsed.as_millis() as u64)),
            admitted = self.admitted,
            retires_submitted = self.retires_submitted,
            loads_completed = self.tasks.loads_completed,
            loads_failed = self.tasks.loads_failed,
            integrity_warnings = self.tasks.integrity_warnings,
            retires_completed = self.tasks.retires_completed,
            retires_failed = self.tasks.retires_failed,
            sessions_unavailable = self.tasks.sessions_unavailable,
            abandoned = self.shutdown.outstanding,
            first_rss_mib = self.probe.first_rss_bytes().map(|b| b / (1024 * 1024)),
            peak_rss_mib = self.probe.peak_rss_bytes().map(|b| b / (1024 * 1024)),
            "churn run finished"
        );
    }
}

impl ChurnHarness {
    pub fn new(config: ChurnConfig) -> Result<Self, ChurnError> {
        config.validate()?;
        Ok(Self {
            config,
            stop: StopHandle::default(),
        })
    }

    pub fn config(&self) -> &ChurnConfig {
        &self.config
    }

    /// Setting this handle ends admission early; the run then drains and
    /// stops as it would at the deadline.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn run_default(&self) -> Result<RunSummary, ChurnError> {
        self.run(self.config.default_run_duration)
    }

    /// Runs for `duration`, then drains the pool within the shutdown timeout
    /// and closes the engine. Task failures and a drain timeout are logged
    /// and reported in the summary; only setup failures are returned as
    /// errors.
    pub fn run(&self, duration: Duration) -> Result<RunSummary, ChurnError> {
        let started = Instant::now();
        let deadline = deadline_after(started, duration);
        info!(
            duration = %format_iso8601(duration),
            resident_table_limit = self.config.resident_table_limit,
            ingestion_rate = self.config.ingestion_rate,
            rows_per_table = self.config.rows_per_table,
            worker_threads = self.config.worker_threads,
            "starting churn run"
        );

        let mut scheduler = Scheduler::new(&self.config)?.with_stop_handle(self.stop.clone());
        let sessions = Arc::new(SessionProvider::open_in_memory()?);
        let stats = Arc::new(TaskStats::default());
        let pool = WorkerPool::new(self.config.worker_threads, WORKER_THREAD_PREFIX)?;
        let probe = match self.config.probe_interval {
            Some(interval) => Some(ResourceProbe::spawn(Arc::clone(&sessions), interval)?),
            None => None,
        };

        let admission = {
            let dispatcher = PoolDispatcher::new(&pool, Arc::clone(&sessions), Arc::clone(&stats));
            scheduler.admit_until(deadline, &dispatcher)
        };
        let shutdown = scheduler.drain(pool, self.config.shutdown_timeout);
        let probe = probe.map(ResourceProbe::stop).unwrap_or_default();
        if let Err(err) = scheduler.stop(&sessions) {
            warn!(error = %err, "closing the shared connection failed");
        }
        let tally = admission?;

        let summary = RunSummary {
            elapsed: started.elapsed(),
            admitted: tally.admitted,
            retires_submitted: tally.retires_submitted,
            states: scheduler.history().to_vec(),
            shutdown,
            tasks: stats.snapshot(),
            probe,
        };
        summary.log();
        Ok(summary)
    }
}
