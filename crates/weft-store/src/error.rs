//! Error types for the store module.

use thiserror::Error;

use weft_core::{CoreError, LogKey};

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An append skipped ahead of the stored length.
    #[error("out-of-order append to log {log_key}: expected index {expected}, got {got}")]
    OutOfOrder {
        log_key: LogKey,
        expected: u64,
        got: u64,
    },

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding backend state was poisoned.
    #[error("storage lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking storage task failed to complete.
    #[error("storage task failed: {0}")]
    Task(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by [`crate::Log`] and [`crate::LogStore`].
#[derive(Debug, Error)]
pub enum LogError {
    /// Append attempted without the log's secret key.
    #[error("permission denied: log {0} is read-only here")]
    PermissionDenied(LogKey),

    /// Entry signature did not verify.
    #[error("verification failed for log {log_key} index {index}: {reason}")]
    Verification {
        log_key: LogKey,
        index: u64,
        reason: String,
    },

    /// Entry index is ahead of the next expected index.
    #[error("sequence gap in log {log_key}: expected index {expected}, got {got}")]
    SequenceGap {
        log_key: LogKey,
        expected: u64,
        got: u64,
    },

    /// Storage refused or failed a durable write.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Stored bytes failed to decode.
    #[error("corrupt entry: {0}")]
    Corrupt(#[from] CoreError),

    /// The secret supplied does not belong to this log.
    #[error("key mismatch for log {0}")]
    KeyMismatch(LogKey),

    /// The log store has been closed.
    #[error("log store is closed")]
    Closed,
}

impl LogError {
    /// Errors that only concern one delivery of one log and can be retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LogError::Verification { .. } | LogError::SequenceGap { .. }
        )
    }
}
