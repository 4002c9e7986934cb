use crate::duration::parse_iso8601;
use crate::error::ChurnError;
use std::time::Duration;

pub const ENV_RESIDENT_TABLE_LIMIT: &str = "DUCKCHURN_RESIDENT_TABLE_LIMIT";
pub const ENV_INGESTION_RATE: &str = "DUCKCHURN_INGESTION_RATE";
pub const ENV_BURST_CAPACITY: &str = "DUCKCHURN_BURST_CAPACITY";
pub const ENV_ROWS_PER_TABLE: &str = "DUCKCHURN_ROWS_PER_TABLE";
pub const ENV_WORKER_THREADS: &str = "DUCKCHURN_WORKER_THREADS";
pub const ENV_SHUTDOWN_TIMEOUT: &str = "DUCKCHURN_SHUTDOWN_TIMEOUT";
pub const ENV_PROBE_INTERVAL: &str = "DUCKCHURN_PROBE_INTERVAL";

/// Runtime configuration for a churn run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChurnConfig {
    /// Tables the scheduler intends to keep resident before it starts
    /// retiring the oldest one per admission.
    pub resident_table_limit: u64,
    /// Steady-state admissions per second.
    pub ingestion_rate: f64,
    pub burst_capacity: f64,
    pub rows_per_table: u64,
    pub worker_threads: usize,
    pub shutdown_timeout: Duration,
    pub default_run_duration: Duration,
    /// `None` disables the resource probe.
    pub probe_interval: Option<Duration>,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            resident_table_limit: 100,
            ingestion_rate: 5.0,
            burst_capacity: 1.0,
            rows_per_table: 10_000,
            worker_threads: 4,
            shutdown_timeout: Duration::from_secs(5),
            default_run_duration: Duration::from_secs(60 * 60),
            probe_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl ChurnConfig {
    /// The reference workload: 100 resident tables of 10k rows, 5 admissions
    /// per second, 4 workers.
    pub fn reference() -> Self {
        Self::default()
    }

    /// Small and fast; suitable for tests and local sanity runs.
    pub fn smoke() -> Self {
        Self {
            resident_table_limit: 8,
            ingestion_rate: 200.0,
            burst_capacity: 1.0,
            rows_per_table: 100,
            worker_threads: 4,
            shutdown_timeout: Duration::from_secs(10),
            default_run_duration: Duration::from_secs(1),
            probe_interval: None,
        }
    }

    pub fn with_resident_table_limit(mut self, limit: u64) -> Self {
        self.resident_table_limit = limit;
        self
    }

    pub fn with_ingestion_rate(mut self, per_second: f64) -> Self {
        self.ingestion_rate = per_second;
        self
    }

    pub fn with_rows_per_table(mut self, rows: u64) -> Self {
        self.rows_per_table = rows;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_probe_interval(mut self, interval: Option<Duration>) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Applies `DUCKCHURN_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ChurnError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup. Durations use the
    /// ISO-8601 form; a zero probe interval disables the probe.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ChurnError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_RESIDENT_TABLE_LIMIT) {
            self.resident_table_limit = parse_number(ENV_RESIDENT_TABLE_LIMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_INGESTION_RATE) {
            self.ingestion_rate = parse_number(ENV_INGESTION_RATE, &v)?;
        }
        if let Some(v) = lookup(ENV_BURST_CAPACITY) {
            self.burst_capacity = parse_number(ENV_BURST_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_ROWS_PER_TABLE) {
            self.rows_per_table = parse_number(ENV_ROWS_PER_TABLE, &v)?;
        }
        if let Some(v) = lookup(ENV_WORKER_THREADS) {
            self.worker_threads = parse_number(ENV_WORKER_THREADS, &v)?;
        }
        if let Some(v) = lookup(ENV_SHUTDOWN_TIMEOUT) {
            self.shutdown_timeout = parse_env_duration(ENV_SHUTDOWN_TIMEOUT, &v)?;
        }
        if let Some(v) = lookup(ENV_PROBE_INTERVAL) {
            let interval = parse_env_duration(ENV_PROBE_INTERVAL, &v)?;
            self.probe_interval = (!interval.is_zero()).then_some(interval);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ChurnError> {
        if self.resident_table_limit == 0 {
            return Err(ChurnError::invalid_config(
                "resident_table_limit must be at least 1",
            ));
        }
        if !self.ingestion_rate.is_finite() || self.ingestion_rate <= 0.0 {
            return Err(ChurnError::invalid_config(format!(
                "ingestion_rate must be positive, got {}",
                self.ingestion_rate
            )));
        }
        if !self.burst_capacity.is_finite() || self.burst_capacity < 1.0 {
            return Err(ChurnError::invalid_config(format!(
                "burst_capacity must be at least 1, got {}",
                self.burst_capacity
            )));
        }
        if self.worker_threads == 0 {
            return Err(ChurnError::invalid_config(
                "worker_threads must be at least 1",
            ));
        }
        if i64::try_from(self.rows_per_table).is_err() {
            return Err(ChurnError::invalid_config(format!(
                "rows_per_table {} does not fit a BIGINT id",
                self.rows_per_table
            )));
        }
        Ok(())
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ChurnError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ChurnError::invalid_config(format!("{key}={raw}: {e}")))
}

fn parse_env_duration(key: &str, raw: &str) -> Result<Duration, ChurnError> {
    parse_iso8601(raw.trim()).map_err(|e| ChurnError::invalid_config(format!("{key}: {e}")))
}
