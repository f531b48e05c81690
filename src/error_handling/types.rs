//! Error type definitions.
//!
//! Every stage of the pipeline has its own error enum so callers can tell a
//! dropped item from an aborted one from a fatal setup failure.

use log::SetLoggerError;
use thiserror::Error;

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),

    /// Error initializing the logger with custom message (e.g., file creation).
    #[error("Logger initialization error: {0}")]
    LoggerSetupError(String),

    /// Error building the runtime that drives database I/O.
    #[error("Storage runtime initialization error: {0}")]
    RuntimeError(#[from] std::io::Error),
}

/// Invalid combinations of configuration values.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("DB_POOL_MIN_CONN ({min}) must not exceed DB_POOL_MAX_CONN ({max})")]
    PoolBounds { min: usize, max: usize },

    #[error("TOPIC_NAME must not be empty")]
    MissingTopic,
}

/// Error types for database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error creating the database file.
    #[error("Database file creation error: {0}")]
    FileCreationError(String),

    /// The configured schema file could not be read.
    #[error("Schema file {path} could not be read: {source}")]
    SchemaFileError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error obtaining a connection for the statement.
    #[error(transparent)]
    PoolError(#[from] PoolError),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),
}

impl DatabaseError {
    /// True when the failure came from the pool's abort flag rather than
    /// from the database itself.
    pub fn is_aborted(&self) -> bool {
        matches!(self, DatabaseError::PoolError(PoolError::Aborted))
    }
}

/// Errors raised while checking connections in and out of a pool.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool was aborted while the caller waited for a connection.
    #[error("Connection pool aborted while waiting for a connection")]
    Aborted,

    /// Every connection is checked out. The underlying pool never blocks.
    #[error("Connection pool exhausted ({max} connections in use)")]
    Exhausted { max: usize },

    /// `close_all` has already run.
    #[error("Connection pool is closed")]
    Closed,

    /// The connection could not be opened or closed.
    #[error("Connection error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Errors raised by the worker pool.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExecutorError {
    /// Submission after `shutdown`.
    #[error("Cannot schedule new tasks after shutdown")]
    ShutDown,

    /// The task panicked; the payload message if it had one.
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The worker dropped the task without producing a result.
    #[error("Task was cancelled before it produced a result")]
    Cancelled,
}

/// Errors raised by stream consumers, producers and their factories.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Unknown stream consumer type: {0}")]
    UnknownConsumerType(String),

    #[error("Unknown stream producer type: {0}")]
    UnknownProducerType(String),

    /// `poll`/`persist_data` on an adapter that is not connected.
    #[error("Stream client is not connected")]
    NotConnected,

    #[error("Stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Errors raised by the deferred-signal scope.
#[derive(Error, Debug)]
pub enum SignalError {
    /// A scope is already open on this thread.
    #[error("A deferred-signal scope is already active on this thread")]
    ScopeActive,

    /// `sigaction` failed.
    #[error("Could not install handler for signal {signal}: {source}")]
    Install {
        signal: i32,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborted_is_distinguishable() {
        let aborted = DatabaseError::from(PoolError::Aborted);
        assert!(aborted.is_aborted());

        let exhausted = DatabaseError::from(PoolError::Exhausted { max: 3 });
        assert!(!exhausted.is_aborted());
        assert_eq!(
            exhausted.to_string(),
            "Connection pool exhausted (3 connections in use)"
        );
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::Zero("DB_POOL_MAX_CONN").to_string(),
            "DB_POOL_MAX_CONN must be greater than zero"
        );
        assert_eq!(
            ConfigError::PoolBounds { min: 5, max: 2 }.to_string(),
            "DB_POOL_MIN_CONN (5) must not exceed DB_POOL_MAX_CONN (2)"
        );
    }

    #[test]
    fn test_stream_error_from_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = StreamError::from(err);
        assert!(matches!(err, StreamError::Decode(_)));
    }
}
