//! Storage trait: the durable append/read contract.
//!
//! The log store is storage-agnostic. Implementations include SQLite
//! (primary) and in-memory (for tests).

use async_trait::async_trait;
use bytes::Bytes;
use weft_core::LogKey;

use crate::error::Result;

/// Result of a durable append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// Bytes were written and are durable.
    Appended,
    /// Identical bytes were already stored at this index.
    AlreadyExists,
    /// Different bytes are stored at this index.
    Conflict,
}

/// Durable, append-only storage of encoded entries.
///
/// All methods are async. Blocking backends use `spawn_blocking` internally.
///
/// # Contract
///
/// - `append_durable` at index `i` succeeds only when `i` equals the stored
///   length of the log; appending further ahead is
///   [`crate::StoreError::OutOfOrder`].
/// - An acknowledged append survives a crash and is atomic: a log is never
///   observed with a partially written entry.
/// - `read_range(from, to)` returns stored entries with `from <= i < to` in
///   index order, stopping early at the end of the log.
#[async_trait]
pub trait Storage: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Entry Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Durably append `bytes` as entry `index` of `log_key`.
    async fn append_durable(&self, log_key: &LogKey, index: u64, bytes: &[u8])
        -> Result<AppendResult>;

    /// Read the encoded entries `from..to` of a log.
    async fn read_range(&self, log_key: &LogKey, from: u64, to: u64) -> Result<Vec<Bytes>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Log Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Number of entries stored for a log (0 if unknown).
    async fn len(&self, log_key: &LogKey) -> Result<u64>;

    /// Register a log so that it is listed even before its first entry.
    async fn register_log(&self, log_key: &LogKey) -> Result<()>;

    /// All logs known to this storage, ordered by key.
    async fn list_logs(&self) -> Result<Vec<LogKey>>;
}
