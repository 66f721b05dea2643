//! Error types for the permissions module.

use thiserror::Error;

use weft_core::{CredentialId, PublicKey};

/// Errors that can occur during credential admission and key handling.
#[derive(Debug, Error)]
pub enum PermsError {
    /// A credential signature did not verify.
    #[error("credential verification failed: {0}")]
    Verification(String),

    /// The credential names a parent that has not been admitted.
    #[error("unknown parent credential: {0}")]
    UnknownParent(CredentialId),

    /// The issuer is not an admin under the named parent.
    #[error("issuer {issuer} is not an admin")]
    NotAdmin { issuer: PublicKey },

    /// A root credential was not issued by the genesis key.
    #[error("root credential issued by {issuer}, not by genesis")]
    NotGenesis { issuer: PublicKey },

    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Core error.
    #[error("core error: {0}")]
    CoreError(#[from] weft_core::CoreError),
}

impl PermsError {
    /// Whether the credential may become admissible once its parent arrives.
    pub fn is_deferrable(&self) -> bool {
        matches!(self, PermsError::UnknownParent(_))
    }
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
