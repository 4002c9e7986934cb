use super::{RowPayload, TaskStats};
use crate::error::ChurnError;
use crate::identity::{Identity, TableName};
use crate::session::{Session, SessionProvider};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Creates one table, bulk-loads it and verifies its row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTask {
    identity: Identity,
    table: TableName,
    rows: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub table: TableName,
    pub expected_rows: u64,
    pub counted_rows: u64,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn is_intact(&self) -> bool {
        self.expected_rows == self.counted_rows
    }

    /// The integrity warning for this load, if the count came back wrong.
    pub fn integrity_warning(&self) -> Option<ChurnError> {
        (!self.is_intact()).then(|| ChurnError::DataIntegrity {
            table: self.table.to_string(),
            expected: self.expected_rows,
            actual: self.counted_rows,
        })
    }
}

impl LoadTask {
    pub fn new(identity: Identity, rows: u64) -> Self {
        Self {
            identity,
            table: identity.table_name(),
            rows,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Runs create, load and verify on a session of its own. The session is
    /// dropped on every return path.
    pub fn execute(&self, sessions: &SessionProvider) -> Result<LoadReport, ChurnError> {
        let started = Instant::now();
        let row_limit = i64::try_from(self.rows).map_err(|_| {
            ChurnError::invalid_config(format!(
                "row count {} for table '{}' does not fit a BIGINT id",
                self.rows, self.table
            ))
        })?;
        let session = sessions.open()?;
        let counted_rows = self.load_into(&session, row_limit)?;
        Ok(LoadReport {
            table: self.table.clone(),
            expected_rows: self.rows,
            counted_rows,
            elapsed: started.elapsed(),
        })
    }

    fn load_into(&self, session: &Session, row_limit: i64) -> Result<u64, ChurnError> {
        session.create_table(&self.table)?;
        let rows = (0..row_limit).map(RowPayload::for_index);
        session.append_rows(&self.table, rows)?;
        session.count_rows(&self.table)
    }

    pub fn run(&self, sessions: &SessionProvider, stats: &TaskStats) {
        info!(table = %self.table, "loading table");
        let outcome = self.execute(sessions);
        stats.record_load(&outcome);
        match outcome {
            Ok(report) => match report.integrity_warning() {
                Some(warning) => warn!(table = %self.table, "{warning}"),
                None => debug!(
                    table = %self.table,
                    rows = report.counted_rows,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "table loaded"
                ),
            },
            Err(err @ ChurnError::SessionUnavailable { .. }) => {
                warn!(table = %self.table, error = %err, "ingestion skipped");
            }
            Err(err) => {
                error!(table = %self.table, code = err.code_str(), error = %err, "error during ingestion");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LoadReport, LoadTask};
    use crate::error::ChurnErrorCode;
    use crate::identity::Identity;
    use crate::session::SessionProvider;
    use crate::task::TaskStats;
    use std::time::Duration;

    #[test]
    fn load_creates_and_verifies_the_reference_row_count() {
        let sessions = SessionProvider::open_in_memory().expect("open db");
        let task = LoadTask::new(Identity::new(0), 10_000);
        let report = task.execute(&sessions).expect("load");
        assert!(report.is_intact());
        assert_eq!(report.counted_rows, 10_000);
        assert!(report.integrity_warning().is_none());

        let session = sessions.open().expect("session");
        assert_eq!(session.count_rows(task.table()).expect("count"), 10_000);
    }

    #[test]
    fn reused_identity_fails_with_schema_error() {
        let sessions = SessionProvider::open_in_memory().expect("open db");
        let task = LoadTask::new(Identity::new(5), 10);
        task.execute(&sessions).expect("first load");
        let err = task.execute(&sessions).expect_err("second load");
        assert_eq!(err.code(), ChurnErrorCode::Schema);

        let stats = TaskStats::default();
        task.run(&sessions, &stats);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.loads_failed, 1);
        assert_eq!(snapshot.sessions_unavailable, 0);
    }

    #[test]
    fn oversized_row_count_is_rejected_before_any_ddl() {
        let sessions = SessionProvider::open_in_memory().expect("open db");
        let task = LoadTask::new(Identity::new(8), u64::MAX);
        let err = task.execute(&sessions).expect_err("row count overflows BIGINT");
        assert_eq!(err.code(), ChurnErrorCode::InvalidConfig);
        let session = sessions.open().expect("session");
        assert!(!session.table_exists(task.table()).expect("exists"));
    }

    #[test]
    fn zero_rows_is_a_valid_load() {
        let sessions = SessionProvider::open_in_memory().expect("open db");
        let report = LoadTask::new(Identity::new(1), 0)
            .execute(&sessions)
            .expect("empty load");
        assert!(report.is_intact());
        assert_eq!(report.counted_rows, 0);
    }

    #[test]
    fn count_mismatch_yields_integrity_warning() {
        let report = LoadReport {
            table: Identity::new(2).table_name(),
            expected_rows: 10,
            counted_rows: 7,
            elapsed: Duration::ZERO,
        };
        let warning = report.integrity_warning().expect("mismatch");
        assert_eq!(warning.code(), ChurnErrorCode::DataIntegrity);
        assert!(!warning.is_fatal());
    }
}
