//! Replication protocol message types.
//!
//! One [`SyncMessage`] travels per transport frame.

use serde::{Deserialize, Serialize};

use weft_core::{Entry, KnowledgeVector, LogKey, PublicKey};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Message size limits, checked on encode and decode.
pub mod limits {
    /// Max encoded frame size.
    pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
    /// Max logs in Hello.known_logs and Hello.knowledge.
    pub const MAX_KNOWN_LOGS: usize = 65_536;
    /// Max entries in Entries.entries or Push.entries.
    pub const MAX_ENTRIES_PER_MESSAGE: usize = 1024;
    /// Max length of Error.message.
    pub const MAX_ERROR_MESSAGE: usize = 4096;
}

/// Replication protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Handshake: who we are and what we hold.
    Hello {
        protocol_version: u8,
        /// The sender's device key.
        peer_id: PublicKey,
        known_logs: Vec<LogKey>,
        knowledge: KnowledgeVector,
    },

    /// Ask for entries `from..to` of one log.
    Request {
        request_id: u64,
        log_key: LogKey,
        from: u64,
        to: u64,
    },

    /// Entries answering a request, in index order.
    Entries {
        request_id: u64,
        log_key: LogKey,
        entries: Vec<Entry>,
        /// Last batch for this request.
        done: bool,
    },

    /// Unsolicited entries that became durable after the handshake.
    Push { log_key: LogKey, entries: Vec<Entry> },

    /// Error condition.
    Error {
        /// Error code for programmatic handling.
        code: SyncErrorCode,
        /// Human-readable description.
        message: String,
    },

    /// Orderly shutdown.
    Close,
}

impl SyncMessage {
    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> Result<(), &'static str> {
        match self {
            SyncMessage::Hello {
                known_logs,
                knowledge,
                ..
            } => {
                if known_logs.len() > limits::MAX_KNOWN_LOGS {
                    return Err("too many known logs");
                }
                if knowledge.len() > limits::MAX_KNOWN_LOGS {
                    return Err("knowledge vector too large");
                }
            }
            SyncMessage::Request { from, to, .. } => {
                if from > to {
                    return Err("request range is inverted");
                }
            }
            SyncMessage::Entries {
                log_key, entries, ..
            }
            | SyncMessage::Push { log_key, entries } => {
                if entries.len() > limits::MAX_ENTRIES_PER_MESSAGE {
                    return Err("too many entries");
                }
                if entries.iter().any(|e| &e.log_key != log_key) {
                    return Err("entry from another log");
                }
                if entries.windows(2).any(|w| w[1].index != w[0].index + 1) {
                    return Err("entries not consecutive");
                }
            }
            SyncMessage::Error { message, .. } => {
                if message.len() > limits::MAX_ERROR_MESSAGE {
                    return Err("error message too long");
                }
            }
            SyncMessage::Close => {}
        }
        Ok(())
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Hello { .. } => "hello",
            SyncMessage::Request { .. } => "request",
            SyncMessage::Entries { .. } => "entries",
            SyncMessage::Push { .. } => "push",
            SyncMessage::Error { .. } => "error",
            SyncMessage::Close => "close",
        }
    }
}

/// Error codes for the replication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum SyncErrorCode {
    /// Unknown/unspecified error.
    Unknown = 0,
    /// Protocol version mismatch.
    VersionMismatch = 1,
    /// Message too large.
    MessageTooLarge = 2,
    /// Invalid message format.
    InvalidMessage = 3,
    /// Handshake took too long.
    Timeout = 4,
    /// Internal error on peer.
    InternalError = 6,
}
