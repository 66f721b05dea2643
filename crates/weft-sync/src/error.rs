//! Error types for the sync module.

use std::time::Duration;

use thiserror::Error;

use weft_store::LogError;

use crate::messages::SyncErrorCode;

/// Errors that can occur during replication.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with peer.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Log operation failed.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    PeerError { code: SyncErrorCode, message: String },

    /// No handshake from the peer in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Configuration rejected.
    #[error("invalid session config: {0}")]
    InvalidConfig(String),

    /// A session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(String),

    /// Session was cancelled.
    #[error("session cancelled")]
    Cancelled,
}

impl SyncError {
    /// The code to send the peer when this error ends a session.
    pub fn code(&self) -> SyncErrorCode {
        match self {
            SyncError::VersionMismatch { .. } => SyncErrorCode::VersionMismatch,
            SyncError::InvalidMessage(_) | SyncError::Codec(_) => SyncErrorCode::InvalidMessage,
            SyncError::HandshakeTimeout(_) => SyncErrorCode::Timeout,
            _ => SyncErrorCode::InternalError,
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
