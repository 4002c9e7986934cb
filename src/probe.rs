//! Periodic resource sampling while the churn runs.
//!
//! A dedicated thread records process RSS, the engine's own memory figure
//! and the number of resident tables, once at start, then every interval,
//! and once more when stopped. Sampling failures leave the field empty.

use crate::duration::format_iso8601;
use crate::error::ChurnError;
use crate::session::SessionProvider;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, System};
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSample {
    /// Offset from probe start.
    pub at: Duration,
    pub rss_bytes: Option<u64>,
    pub engine_memory_bytes: Option<u64>,
    pub resident_tables: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub samples: Vec<ProbeSample>,
}

impl ProbeSummary {
    pub fn first_rss_bytes(&self) -> Option<u64> {
        self.samples.iter().find_map(|s| s.rss_bytes)
    }

    pub fn peak_rss_bytes(&self) -> Option<u64> {
        self.samples.iter().filter_map(|s| s.rss_bytes).max()
    }

    pub fn last(&self) -> Option<&ProbeSample> {
        self.samples.last()
    }
}

/// Resident set size of the current process.
pub struct ProcessMemory {
    system: System,
    pid: Option<Pid>,
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system
            .refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory());
        self.system.process(pid).map(|process| process.memory())
    }
}

/// Takes one sample through its own session.
pub fn sample(sessions: &SessionProvider, memory: &mut ProcessMemory, at: Duration) -> ProbeSample {
    let rss_bytes = memory.resident_bytes();
    let (engine_memory_bytes, resident_tables) = match sessions.open() {
        Ok(session) => (
            session
                .engine_memory_bytes()
                .inspect_err(|e| debug!(error = %e, "engine memory unavailable"))
                .ok(),
            session
                .resident_tables()
                .inspect_err(|e| warn!(error = %e, "resident table count failed"))
                .ok(),
        ),
        Err(err) => {
            debug!(error = %err, "probe could not open a session");
            (None, None)
        }
    };
    ProbeSample {
        at,
        rss_bytes,
        engine_memory_bytes,
        resident_tables,
    }
}

fn log_sample(sample: &ProbeSample) {
    info!(
        elapsed = %format_iso8601(Duration::from_secs(sample.at.as_secs())),
        rss_mib = sample.rss_bytes.map(|b| b / MIB),
        engine_mib = sample.engine_memory_bytes.map(|b| b / MIB),
        resident_tables = sample.resident_tables,
        "resource sample"
    );
}

pub struct ResourceProbe {
    stop_tx: Sender<()>,
    handle: JoinHandle<Vec<ProbeSample>>,
}

impl ResourceProbe {
    pub fn spawn(sessions: Arc<SessionProvider>, interval: Duration) -> Result<Self, ChurnError> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let handle = std::thread::Builder::new()
            .name("resource-probe".into())
            .spawn(move || {
                let started = Instant::now();
                let mut memory = ProcessMemory::new();
                let mut samples = Vec::new();
                loop {
                    let taken = sample(&sessions, &mut memory, started.elapsed());
                    log_sample(&taken);
                    samples.push(taken);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                let last = sample(&sessions, &mut memory, started.elapsed());
                log_sample(&last);
                samples.push(last);
                samples
            })?;
        Ok(Self { stop_tx, handle })
    }

    /// Stops the probe after one final sample and returns everything taken.
    pub fn stop(self) -> ProbeSummary {
        let _ = self.stop_tx.send(());
        match self.handle.join() {
            Ok(samples) => ProbeSummary { samples },
            Err(_) => {
                warn!("resource probe panicked");
                ProbeSummary::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProbeSample, ProbeSummary, ProcessMemory, ResourceProbe, sample};
    use crate::identity::Identity;
    use crate::session::SessionProvider;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn sample_counts_resident_tables() {
        let sessions = SessionProvider::open_in_memory().expect("open db");
        let session = sessions.open().expect("session");
        for i in 0..3 {
            session
                .create_table(&Identity::new(i).table_name())
                .expect("create");
        }
        let mut memory = ProcessMemory::new();
        let taken = sample(&sessions, &mut memory, Duration::ZERO);
        assert_eq!(taken.resident_tables, Some(3));
        assert!(taken.rss_bytes.unwrap_or(1) > 0);
    }

    #[test]
    fn sample_after_close_has_no_engine_fields() {
        let sessions = SessionProvider::open_in_memory().expect("open db");
        sessions.close().expect("close");
        let taken = sample(&sessions, &mut ProcessMemory::new(), Duration::ZERO);
        assert_eq!(taken.resident_tables, None);
        assert_eq!(taken.engine_memory_bytes, None);
    }

    #[test]
    fn probe_takes_baseline_and_final_samples() {
        let sessions = Arc::new(SessionProvider::open_in_memory().expect("open db"));
        let probe = ResourceProbe::spawn(Arc::clone(&sessions), Duration::from_secs(3600))
            .expect("spawn probe");
        let summary = probe.stop();
        assert_eq!(summary.samples.len(), 2);
        assert_eq!(summary.last().and_then(|s| s.resident_tables), Some(0));
    }

    #[test]
    fn summary_reports_first_and_peak_rss() {
        let at = |secs, rss| ProbeSample {
            at: Duration::from_secs(secs),
            rss_bytes: rss,
            engine_memory_bytes: None,
            resident_tables: None,
        };
        let summary = ProbeSummary {
            samples: vec![at(0, None), at(1, Some(30)), at(2, Some(90)), at(3, Some(60))],
        };
        assert_eq!(summary.first_rss_bytes(), Some(30));
        assert_eq!(summary.peak_rss_bytes(), Some(90));
        assert_eq!(ProbeSummary::default().peak_rss_bytes(), None);
    }
}
