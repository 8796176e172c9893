//! Error types for named data sources.
//!
//! Failures are split into connection errors (a handle could not be acquired,
//! or a transaction could not be begun) and execution errors (the unit of work
//! failed, or the commit did). Every variant raised by a data source carries
//! the data source name so a log line alone identifies the failing pool.

use crate::db::driver::DriverError;
use thiserror::Error;

/// Stage of a unit of work at which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    Begin,
    Work,
    Commit,
    Rollback,
    Probe,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Acquire => "acquire",
            Self::Begin => "begin",
            Self::Work => "work",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Probe => "probe",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error(
        "[{data_source}] failed to acquire a connection (usage: {borrowed} of {initialized}): {source}"
    )]
    Acquire {
        data_source: String,
        borrowed: u64,
        initialized: u64,
        #[source]
        source: DriverError,
    },

    #[error("[{data_source}] failed to begin transaction: {source}")]
    Begin {
        data_source: String,
        #[source]
        source: DriverError,
    },

    #[error("[{data_source}] failed to commit transaction: {source}")]
    Commit {
        data_source: String,
        #[source]
        source: DriverError,
    },

    /// The driver already rolled the transaction back; no rollback was issued.
    #[error("[{data_source}] ROLLBACK Done Manually. Core Reason: {source}")]
    RollbackDoneManually {
        data_source: String,
        #[source]
        source: Box<DbError>,
    },

    /// A rollback was issued after the unit of work failed. The outcome of the
    /// rollback itself is only logged.
    #[error("[{data_source}] ROLLBACK Finished. Core Reason: {source}")]
    RollbackFinished {
        data_source: String,
        #[source]
        source: Box<DbError>,
    },

    #[error("[{data_source}] unit of work failed: {source}")]
    Work {
        data_source: String,
        #[source]
        source: Box<DbError>,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(
        "[{data_source}] not ready: no connection could be obtained within {timeout_ms}ms. Review the host, port, credentials and pool.acquire_timeout configuration"
    )]
    NotReady { data_source: String, timeout_ms: u64 },

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Data source '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Failure raised by caller code inside a unit of work.
    #[error("{message}")]
    Failed { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a caller-side failure, typically returned from a unit of work.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Whether this error means no usable connection was obtained.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Acquire { .. } | Self::Begin { .. } | Self::NotReady { .. }
        )
    }

    /// Whether this error is the driver's "transaction was rolled back" signal.
    pub fn is_transaction_rolled_back(&self) -> bool {
        matches!(self, Self::Driver(DriverError::TransactionRolledBack(_)))
    }

    /// Name of the data source that raised this error, when known.
    pub fn data_source(&self) -> Option<&str> {
        match self {
            Self::Acquire { data_source, .. }
            | Self::Begin { data_source, .. }
            | Self::Commit { data_source, .. }
            | Self::RollbackDoneManually { data_source, .. }
            | Self::RollbackFinished { data_source, .. }
            | Self::Work { data_source, .. }
            | Self::NotReady { data_source, .. } => Some(data_source),
            _ => None,
        }
    }

    /// Stage at which a data source raised this error.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Acquire { .. } => Some(Stage::Acquire),
            Self::Begin { .. } => Some(Stage::Begin),
            Self::Commit { .. } => Some(Stage::Commit),
            Self::RollbackDoneManually { .. } | Self::RollbackFinished { .. } => {
                Some(Stage::Rollback)
            }
            Self::Work { .. } => Some(Stage::Work),
            Self::NotReady { .. } => Some(Stage::Probe),
            _ => None,
        }
    }

    /// The error a unit of work originally failed with, unwrapping the
    /// data-source level wrappers.
    pub fn root_cause(&self) -> &DbError {
        match self {
            Self::RollbackDoneManually { source, .. }
            | Self::RollbackFinished { source, .. }
            | Self::Work { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for data source operations.
pub type DbResult<T> = Result<T, DbError>;
