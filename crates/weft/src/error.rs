//! Error types for the engine.

use std::time::Duration;

use thiserror::Error;

use weft_core::CoreError;
use weft_perms::PermsError;
use weft_store::{LogError, StoreError};
use weft_sync::{SessionId, SyncError};

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Log operation failed.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Credential or key error.
    #[error("permission error: {0}")]
    Perms(#[from] PermsError),

    /// Replication error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Encoding error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No session with this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// This device lacks the capability for the operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Invalid operation.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A wait did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The engine is closed.
    #[error("engine closed")]
    Closed,
}

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A signature did not verify.
    Verification,
    /// An entry arrived out of index order.
    SequenceGap,
    /// Write without the key or capability for it.
    PermissionDenied,
    /// Durable storage failed.
    Storage,
    /// The peer did not complete the handshake in time.
    HandshakeTimeout,
    /// The engine or store is closed.
    Closed,
    Other,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Log(e) | EngineError::Sync(SyncError::Log(e)) => log_kind(e),
            EngineError::Store(_) => ErrorKind::Storage,
            EngineError::Perms(PermsError::Verification(_))
            | EngineError::Core(CoreError::InvalidSignature) => ErrorKind::Verification,
            EngineError::Perms(PermsError::NotAdmin { .. } | PermsError::NotGenesis { .. })
            | EngineError::NotAuthorized(_) => ErrorKind::PermissionDenied,
            EngineError::Sync(SyncError::HandshakeTimeout(_)) => ErrorKind::HandshakeTimeout,
            EngineError::Closed => ErrorKind::Closed,
            _ => ErrorKind::Other,
        }
    }
}

fn log_kind(error: &LogError) -> ErrorKind {
    match error {
        LogError::Verification { .. } => ErrorKind::Verification,
        LogError::SequenceGap { .. } => ErrorKind::SequenceGap,
        LogError::PermissionDenied(_) | LogError::KeyMismatch(_) => ErrorKind::PermissionDenied,
        LogError::Storage(_) | LogError::Corrupt(_) => ErrorKind::Storage,
        LogError::Closed => ErrorKind::Closed,
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
