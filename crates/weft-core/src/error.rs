//! Error types for Weft core.

use thiserror::Error;

use crate::types::LogKey;

/// Errors from encoding, decoding and signature checks.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Reasons an entry is refused at ingestion.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("entry belongs to log {got}, expected {expected}")]
    LogMismatch { expected: LogKey, got: LogKey },

    #[error("sequence gap: expected index {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::MalformedEntry(msg)
            | CoreError::MalformedPayload(msg)
            | CoreError::EncodingError(msg)
            | CoreError::DecodingError(msg) => ValidationError::StructuralError(msg),
        }
    }
}
