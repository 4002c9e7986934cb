use super::TaskStats;
use crate::error::ChurnError;
use crate::identity::{Identity, TableName};
use crate::session::SessionProvider;
use tracing::{error, info, warn};

/// Drops one table, tolerating its absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetireTask {
    identity: Identity,
    table: TableName,
}

impl RetireTask {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            table: identity.table_name(),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn execute(&self, sessions: &SessionProvider) -> Result<(), ChurnError> {
        let session = sessions.open()?;
        session.drop_table_if_exists(&self.table)
    }

    pub fn run(&self, sessions: &SessionProvider, stats: &TaskStats) {
        info!(table = %self.table, "dropping table");
        let outcome = self.execute(sessions);
        stats.record_retire(&outcome);
        match outcome {
            Ok(()) => {}
            Err(err @ ChurnError::SessionUnavailable { .. }) => {
                warn!(table = %self.table, error = %err, "drop skipped");
            }
            Err(err) => {
                error!(table = %self.table, code = err.code_str(), error = %err, "error dropping table");
            }
        }
    }
}
