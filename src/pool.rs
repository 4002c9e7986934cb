use crate::duration::{deadline_after, format_iso8601};
use crate::error::ChurnError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads pulling from one unbounded queue.
///
/// Jobs are dequeued in submission order but complete in any order.
/// Submission never blocks.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    outstanding: Arc<Outstanding>,
    panicked: Arc<AtomicU64>,
}

/// Queued plus in-flight jobs.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    drained: Condvar,
}

impl Outstanding {
    fn increment(&self) {
        *self.count.lock() += 1;
    }

    fn decrement(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.drained.notify_all();
        }
    }

    fn current(&self) -> usize {
        *self.count.lock()
    }

    /// Waits until nothing is outstanding or `deadline` passes; returns what
    /// is still outstanding.
    fn wait_until(&self, deadline: Instant) -> usize {
        let mut count = self.count.lock();
        while *count > 0 {
            if self.drained.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        *count
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: bool,
    pub outstanding: usize,
    pub timeout: Duration,
    pub waited: Duration,
    pub panicked_tasks: u64,
}

impl ShutdownReport {
    pub fn into_result(self) -> Result<(), ChurnError> {
        if self.drained {
            Ok(())
        } else {
            Err(ChurnError::ShutdownTimeout {
                timeout: self.timeout,
                outstanding: self.outstanding,
            })
        }
    }
}

impl WorkerPool {
    /// Starts `threads` workers named `{name_prefix}-{n}`.
    pub fn new(threads: usize, name_prefix: &str) -> Result<Self, ChurnError> {
        let worker_count = threads.max(1);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let outstanding = Arc::new(Outstanding::default());
        let panicked = Arc::new(AtomicU64::new(0));
        let mut workers = Vec::with_capacity(worker_count);
        for n in 0..worker_count {
            let rx = receiver.clone();
            let outstanding = Arc::clone(&outstanding);
            let panicked = Arc::clone(&panicked);
            let handle = std::thread::Builder::new()
                .name(format!("{name_prefix}-{n}"))
                .spawn(move || run_worker(rx, outstanding, panicked))?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Some(sender),
            workers,
            outstanding,
            panicked,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F>(&self, job: F) -> Result<(), ChurnError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(ChurnError::PoolClosed);
        };
        self.outstanding.increment();
        if sender.send(Box::new(job)).is_err() {
            self.outstanding.decrement();
            return Err(ChurnError::PoolClosed);
        }
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.current()
    }

    pub fn panicked_tasks(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Stops accepting work and lets queued and in-flight jobs drain for up
    /// to `timeout`. Workers still busy after that are detached, not joined;
    /// the report says how many jobs were abandoned.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        drop(self.sender.take());
        let started = Instant::now();
        let outstanding = self.outstanding.wait_until(deadline_after(started, timeout));
        let waited = started.elapsed();
        let drained = outstanding == 0;
        if drained {
            for worker in self.workers.drain(..) {
                let _ = worker.join();
            }
            debug!(waited_ms = waited.as_millis() as u64, "worker pool drained");
        } else {
            warn!(
                outstanding,
                timeout = %format_iso8601(timeout),
                "thread pool has taken longer than the shutdown timeout to shut down"
            );
            self.workers.clear();
        }
        ShutdownReport {
            drained,
            outstanding,
            timeout,
            waited,
            panicked_tasks: self.panicked_tasks(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Disconnecting lets idle workers exit; nobody waits for busy ones.
        self.sender.take();
    }
}

fn run_worker(rx: Receiver<Job>, outstanding: Arc<Outstanding>, panicked: Arc<AtomicU64>) {
    while let Ok(job) = rx.recv() {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
            panicked.fetch_add(1, Ordering::Relaxed);
            warn!("worker task panicked");
        }
        outstanding.decrement();
    }
}
