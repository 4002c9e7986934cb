use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOperation {
    Append,
    Verify,
    Probe,
    Close,
}

impl std::fmt::Display for EngineOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineOperation::Append => write!(f, "append"),
            EngineOperation::Verify => write!(f, "verify"),
            EngineOperation::Probe => write!(f, "probe"),
            EngineOperation::Close => write!(f, "close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChurnErrorCode {
    MalformedDuration,
    InvalidConfig,
    Schema,
    Engine,
    DataIntegrity,
    SessionUnavailable,
    ShutdownTimeout,
    PoolClosed,
    Io,
}

impl ChurnErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChurnErrorCode::MalformedDuration => "malformed_duration",
            ChurnErrorCode::InvalidConfig => "invalid_config",
            ChurnErrorCode::Schema => "schema_error",
            ChurnErrorCode::Engine => "engine_error",
            ChurnErrorCode::DataIntegrity => "data_integrity_warning",
            ChurnErrorCode::SessionUnavailable => "session_unavailable",
            ChurnErrorCode::ShutdownTimeout => "shutdown_timeout",
            ChurnErrorCode::PoolClosed => "pool_closed",
            ChurnErrorCode::Io => "io",
        }
    }
}

#[derive(Debug, Error)]
pub enum ChurnError {
    #[error("malformed duration '{input}': {reason}")]
    MalformedDuration { input: String, reason: String },
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("schema error on table '{table}': {source}")]
    Schema {
        table: String,
        #[source]
        source: duckdb::Error,
    },
    #[error("{operation} failed on table '{table}': {source}")]
    Engine {
        table: String,
        operation: EngineOperation,
        #[source]
        source: duckdb::Error,
    },
    #[error("table '{table}' count is wrong: expected {expected}, actual {actual}")]
    DataIntegrity {
        table: String,
        expected: u64,
        actual: u64,
    },
    #[error("session unavailable: {message}")]
    SessionUnavailable { message: String },
    #[error("worker pool took longer than {timeout:?} to shut down; {outstanding} task(s) abandoned")]
    ShutdownTimeout {
        timeout: Duration,
        outstanding: usize,
    },
    #[error("worker pool is no longer accepting work")]
    PoolClosed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChurnError {
    pub fn code(&self) -> ChurnErrorCode {
        match self {
            ChurnError::MalformedDuration { .. } => ChurnErrorCode::MalformedDuration,
            ChurnError::InvalidConfig { .. } => ChurnErrorCode::InvalidConfig,
            ChurnError::Schema { .. } => ChurnErrorCode::Schema,
            ChurnError::Engine { .. } => ChurnErrorCode::Engine,
            ChurnError::DataIntegrity { .. } => ChurnErrorCode::DataIntegrity,
            ChurnError::SessionUnavailable { .. } => ChurnErrorCode::SessionUnavailable,
            ChurnError::ShutdownTimeout { .. } => ChurnErrorCode::ShutdownTimeout,
            ChurnError::PoolClosed => ChurnErrorCode::PoolClosed,
            ChurnError::Io(_) => ChurnErrorCode::Io,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Errors that abort the process before any work is admitted. Everything
    /// else is contained by the task or shutdown step that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChurnError::MalformedDuration { .. } | ChurnError::InvalidConfig { .. }
        )
    }

    pub(crate) fn malformed_duration(input: &str, reason: impl Into<String>) -> Self {
        ChurnError::MalformedDuration {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        ChurnError::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChurnError, ChurnErrorCode};
    use std::time::Duration;

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(ChurnErrorCode::Schema.as_str(), "schema_error");
        assert_eq!(
            ChurnErrorCode::DataIntegrity.as_str(),
            "data_integrity_warning"
        );
        assert_eq!(
            ChurnErrorCode::SessionUnavailable.as_str(),
            "session_unavailable"
        );
    }

    #[test]
    fn only_startup_errors_are_fatal() {
        assert!(ChurnError::malformed_duration("PX", "bad unit").is_fatal());
        assert!(ChurnError::invalid_config("zero workers").is_fatal());
        let timeout = ChurnError::ShutdownTimeout {
            timeout: Duration::from_secs(5),
            outstanding: 3,
        };
        assert!(!timeout.is_fatal());
        assert_eq!(timeout.code_str(), "shutdown_timeout");
        let integrity = ChurnError::DataIntegrity {
            table: "T000000001".into(),
            expected: 10,
            actual: 9,
        };
        assert!(!integrity.is_fatal());
        assert_eq!(
            integrity.to_string(),
            "table 'T000000001' count is wrong: expected 10, actual 9"
        );
    }
}
