//! In-memory implementation of the Storage trait.
//!
//! Same semantics as SQLite, no persistence. Primarily for tests.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use weft_core::LogKey;

use crate::error::{Result, StoreError};
use crate::storage::{AppendResult, Storage};

/// In-memory storage. All data is lost when dropped.
#[derive(Default)]
pub struct MemoryStorage {
    logs: RwLock<BTreeMap<LogKey, Vec<Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<LogKey, Vec<Bytes>>>> {
        self.logs
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<LogKey, Vec<Bytes>>>> {
        self.logs
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    /// Total number of stored entries across all logs.
    pub fn entry_count(&self) -> Result<usize> {
        Ok(self.read()?.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn append_durable(
        &self,
        log_key: &LogKey,
        index: u64,
        bytes: &[u8],
    ) -> Result<AppendResult> {
        let mut logs = self.write()?;
        let entries = logs.entry(*log_key).or_default();
        let len = entries.len() as u64;

        if index < len {
            let existing = &entries[index as usize];
            return Ok(if existing.as_ref() == bytes {
                AppendResult::AlreadyExists
            } else {
                AppendResult::Conflict
            });
        }
        if index > len {
            return Err(StoreError::OutOfOrder {
                log_key: *log_key,
                expected: len,
                got: index,
            });
        }

        entries.push(Bytes::copy_from_slice(bytes));
        Ok(AppendResult::Appended)
    }

    async fn read_range(&self, log_key: &LogKey, from: u64, to: u64) -> Result<Vec<Bytes>> {
        let logs = self.read()?;
        let Some(entries) = logs.get(log_key) else {
            return Ok(Vec::new());
        };
        let end = (to.min(entries.len() as u64)) as usize;
        let start = (from as usize).min(end);
        Ok(entries[start..end].to_vec())
    }

    async fn len(&self, log_key: &LogKey) -> Result<u64> {
        Ok(self.read()?.get(log_key).map_or(0, |e| e.len() as u64))
    }

    async fn register_log(&self, log_key: &LogKey) -> Result<()> {
        self.write()?.entry(*log_key).or_default();
        Ok(())
    }

    async fn list_logs(&self) -> Result<Vec<LogKey>> {
        Ok(self.read()?.keys().copied().collect())
    }
}
