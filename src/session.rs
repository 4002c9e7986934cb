//! Session provider over one shared DuckDB connection.
//!
//! The provider owns the root connection exclusively and never runs
//! statements on it. Every unit of work gets its own duplicate
//! (`Connection::try_clone`), which has private statement, transaction and
//! result state but reads and writes the same in-memory catalog. A session is
//! released when it is dropped, so every exit path of a task gives it back.

use crate::error::{ChurnError, EngineOperation};
use crate::identity::TableName;
use crate::task::RowPayload;
use duckdb::{Connection, params};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

pub struct SessionProvider {
    root: Mutex<Option<Connection>>,
    opened: AtomicU64,
}

impl SessionProvider {
    /// Opens a fresh in-memory engine instance.
    pub fn open_in_memory() -> Result<Self, ChurnError> {
        let root = Connection::open_in_memory().map_err(|e| ChurnError::SessionUnavailable {
            message: format!("open in-memory database: {e}"),
        })?;
        info!("opened in-memory database");
        Ok(Self::from_connection(root))
    }

    pub fn from_connection(root: Connection) -> Self {
        Self {
            root: Mutex::new(Some(root)),
            opened: AtomicU64::new(0),
        }
    }

    /// Duplicates the shared connection into an isolated session. Fails with
    /// `SessionUnavailable` once the provider has been closed.
    pub fn open(&self) -> Result<Session, ChurnError> {
        let guard = self.root.lock();
        let Some(root) = guard.as_ref() else {
            return Err(ChurnError::SessionUnavailable {
                message: "shared connection is closed".into(),
            });
        };
        let conn = root.try_clone().map_err(|e| ChurnError::SessionUnavailable {
            message: format!("duplicate shared connection: {e}"),
        })?;
        let id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Session { conn, id })
    }

    pub fn is_open(&self) -> bool {
        self.root.lock().is_some()
    }

    pub fn sessions_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Closes the shared connection. Sessions already handed out stay usable
    /// until they are dropped; new `open` calls fail. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), ChurnError> {
        let Some(root) = self.root.lock().take() else {
            return Ok(());
        };
        root.close().map_err(|(_, source)| ChurnError::Engine {
            table: "<shared connection>".into(),
            operation: EngineOperation::Close,
            source,
        })?;
        info!("closed shared connection");
        Ok(())
    }
}

/// An isolated execution context owned by exactly one task invocation.
pub struct Session {
    conn: Connection,
    id: u64,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Direct access for statements outside the churn workload, such as
    /// explicit transactions.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn create_table(&self, table: &TableName) -> Result<(), ChurnError> {
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE {table} (id BIGINT, message VARCHAR)"
            ))
            .map_err(|source| ChurnError::Schema {
                table: table.to_string(),
                source,
            })
    }

    pub fn drop_table_if_exists(&self, table: &TableName) -> Result<(), ChurnError> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {table}"))
            .map_err(|source| ChurnError::Schema {
                table: table.to_string(),
                source,
            })
    }

    /// Bulk-loads `rows` through the appender and returns how many were
    /// appended.
    pub fn append_rows<I>(&self, table: &TableName, rows: I) -> Result<u64, ChurnError>
    where
        I: IntoIterator<Item = RowPayload>,
    {
        let append_err = |source: duckdb::Error| ChurnError::Engine {
            table: table.to_string(),
            operation: EngineOperation::Append,
            source,
        };
        let mut appender = self.conn.appender(table.as_str()).map_err(append_err)?;
        let mut appended = 0u64;
        for row in rows {
            appender
                .append_row(params![row.id, row.message])
                .map_err(append_err)?;
            appended += 1;
        }
        appender.flush().map_err(append_err)?;
        debug!(table = %table, session = self.id, appended, "appended rows");
        Ok(appended)
    }

    pub fn count_rows(&self, table: &TableName) -> Result<u64, ChurnError> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(|source| ChurnError::Engine {
                table: table.to_string(),
                operation: EngineOperation::Verify,
                source,
            })?;
        Ok(count.max(0) as u64)
    }

    pub fn table_exists(&self, table: &TableName) -> Result<bool, ChurnError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema = 'main' AND table_name = ?",
                params![table.as_str()],
                |row| row.get(0),
            )
            .map_err(|source| ChurnError::Engine {
                table: table.to_string(),
                operation: EngineOperation::Probe,
                source,
            })?;
        Ok(count > 0)
    }

    /// Number of user tables currently in the catalog.
    pub fn resident_tables(&self) -> Result<u64, ChurnError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT count(*) FROM information_schema.tables \
                 WHERE table_schema = 'main' AND table_type = 'BASE TABLE'",
                [],
                |row| row.get(0),
            )
            .map_err(|source| ChurnError::Engine {
                table: "information_schema.tables".into(),
                operation: EngineOperation::Probe,
                source,
            })?;
        Ok(count.max(0) as u64)
    }

    /// Bytes the engine reports as held by its buffer manager.
    pub fn engine_memory_bytes(&self) -> Result<u64, ChurnError> {
        let bytes: i64 = self
            .conn
            .query_row(
                "SELECT coalesce(sum(memory_usage_bytes), 0)::BIGINT FROM duckdb_memory()",
                [],
                |row| row.get(0),
            )
            .map_err(|source| ChurnError::Engine {
                table: "duckdb_memory()".into(),
                operation: EngineOperation::Probe,
                source,
            })?;
        Ok(bytes.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::SessionProvider;
    use crate::error::ChurnErrorCode;
    use crate::identity::Identity;
    use crate::task::RowPayload;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sessions_share_one_catalog() {
        let provider = SessionProvider::open_in_memory().expect("open db");
        let table = Identity::new(1).table_name();
        let writer = provider.open().expect("writer session");
        writer.create_table(&table).expect("create");
        writer
            .append_rows(&table, (0..10).map(RowPayload::for_index))
            .expect("append");

        let reader = provider.open().expect("reader session");
        assert_ne!(writer.id(), reader.id());
        assert!(reader.table_exists(&table).expect("exists"));
        assert_eq!(reader.count_rows(&table).expect("count"), 10);
        assert_eq!(reader.resident_tables().expect("resident"), 1);
        assert_eq!(provider.sessions_opened(), 2);
    }

    #[test]
    fn open_after_close_is_session_unavailable() {
        let provider = SessionProvider::open_in_memory().expect("open db");
        let survivor = provider.open().expect("session before close");
        provider.close().expect("close");
        provider.close().expect("second close is a no-op");
        assert!(!provider.is_open());

        let err = provider.open().err().expect("open after close must fail");
        assert_eq!(err.code(), ChurnErrorCode::SessionUnavailable);

        // a session opened before close keeps the database alive
        let table = Identity::new(9).table_name();
        survivor.create_table(&table).expect("create on survivor");
        assert!(survivor.table_exists(&table).expect("exists"));
    }

    #[test]
    fn concurrent_opens_are_safe() {
        let provider = Arc::new(SessionProvider::open_in_memory().expect("open db"));
        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let provider = Arc::clone(&provider);
                thread::spawn(move || {
                    let session = provider.open().expect("session");
                    let table = Identity::new(i).table_name();
                    session.create_table(&table).expect("create");
                    session.id()
                })
            })
            .collect();
        let mut ids: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().expect("open thread"))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        let session = provider.open().expect("session");
        assert_eq!(session.resident_tables().expect("resident"), 8);
    }

    #[test]
    fn duplicate_create_is_a_schema_error() {
        let provider = SessionProvider::open_in_memory().expect("open db");
        let session = provider.open().expect("session");
        let table = Identity::new(3).table_name();
        session.create_table(&table).expect("first create");
        let err = session.create_table(&table).expect_err("second create");
        assert_eq!(err.code(), ChurnErrorCode::Schema);
        session.drop_table_if_exists(&table).expect("drop");
        session
            .drop_table_if_exists(&table)
            .expect("drop of absent table");
    }
}
