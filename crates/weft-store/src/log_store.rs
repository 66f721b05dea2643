//! The set of logs a replica knows about.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use weft_core::{validate_entry, Entry, Keypair, KnowledgeVector, LogKey, ValidationError};

use crate::error::LogError;
use crate::log::{DurableEvent, IngestOutcome, Log};
use crate::storage::Storage;

/// Tuning for a [`LogStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogStoreConfig {
    /// Capacity of the durable-event broadcast. Slow subscribers that fall
    /// further behind observe a lag and must rescan.
    pub event_capacity: usize,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
        }
    }
}

/// Owns the mapping from log key to [`Log`].
///
/// Only a log created with its keypair can be appended to. Every other log,
/// including all logs filled by replication, only ingests signed entries.
pub struct LogStore {
    storage: Arc<dyn Storage>,
    logs: RwLock<HashMap<LogKey, Arc<Log>>>,
    events: broadcast::Sender<DurableEvent>,
    closed: Arc<AtomicBool>,
}

impl LogStore {
    /// Open a store over `storage`, loading every log it already holds as
    /// read-only.
    pub async fn open(storage: Arc<dyn Storage>, config: LogStoreConfig) -> Result<Self, LogError> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));

        let mut logs = HashMap::new();
        for key in storage.list_logs().await? {
            let len = storage.len(&key).await?;
            let log = Log::new(key, storage.clone(), len, events.clone(), closed.clone());
            logs.insert(key, Arc::new(log));
        }
        tracing::debug!(logs = logs.len(), "log store opened");

        Ok(Self {
            storage,
            logs: RwLock::new(logs),
            events,
            closed,
        })
    }

    /// The writable log for `keypair`, creating it if needed.
    pub async fn create(&self, keypair: Keypair) -> Result<Arc<Log>, LogError> {
        let log = self.get_or_create(keypair.public_key()).await?;
        log.attach_secret(keypair)?;
        Ok(log)
    }

    /// The log for `log_key`, creating a read-only one if needed.
    pub async fn get_or_create(&self, log_key: LogKey) -> Result<Arc<Log>, LogError> {
        if let Some(log) = self.get(&log_key).await {
            return Ok(log);
        }
        self.ensure_open()?;

        self.storage.register_log(&log_key).await?;
        let len = self.storage.len(&log_key).await?;

        let mut logs = self.logs.write().await;
        let log = logs.entry(log_key).or_insert_with(|| {
            tracing::debug!(log = %log_key, len, "log registered");
            Arc::new(Log::new(
                log_key,
                self.storage.clone(),
                len,
                self.events.clone(),
                self.closed.clone(),
            ))
        });
        Ok(log.clone())
    }

    /// Open the log for `log_key`. It is writable only if `secret` is the
    /// matching keypair.
    pub async fn open_log(&self, log_key: LogKey, secret: Option<Keypair>) -> Result<Arc<Log>, LogError> {
        let log = self.get_or_create(log_key).await?;
        if let Some(keypair) = secret {
            log.attach_secret(keypair)?;
        }
        Ok(log)
    }

    pub async fn get(&self, log_key: &LogKey) -> Option<Arc<Log>> {
        self.logs.read().await.get(log_key).cloned()
    }

    /// All known log keys, sorted.
    pub async fn list(&self) -> Vec<LogKey> {
        let mut keys: Vec<LogKey> = self.logs.read().await.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Current durable length of every non-empty log.
    pub async fn knowledge(&self) -> KnowledgeVector {
        self.logs
            .read()
            .await
            .iter()
            .map(|(key, log)| (*key, log.len()))
            .collect()
    }

    /// Append to a log this replica writes.
    pub async fn append(&self, log_key: &LogKey, payload: impl Into<Bytes>) -> Result<u64, LogError> {
        let log = self
            .get(log_key)
            .await
            .ok_or(LogError::PermissionDenied(*log_key))?;
        log.append(payload).await
    }

    /// Ingest a remote entry into its log. An unknown log is registered only
    /// by a valid entry at index 0.
    pub async fn ingest(&self, entry: Entry) -> Result<IngestOutcome, LogError> {
        if let Some(log) = self.get(&entry.log_key).await {
            return log.ingest(entry).await;
        }

        match validate_entry(&entry, &entry.log_key, 0) {
            Ok(_) => {}
            Err(ValidationError::SequenceGap { expected, got }) => {
                return Err(LogError::SequenceGap {
                    log_key: entry.log_key,
                    expected,
                    got,
                })
            }
            Err(e) => {
                tracing::debug!(
                    log = %entry.log_key,
                    index = entry.index,
                    error = %e,
                    "rejected entry for unknown log"
                );
                return Err(LogError::Verification {
                    log_key: entry.log_key,
                    index: entry.index,
                    reason: e.to_string(),
                });
            }
        }
        let log = self.get_or_create(entry.log_key).await?;
        log.ingest(entry).await
    }

    /// Entries `from..to` of a log. Unknown logs read as empty.
    pub async fn read_range(&self, log_key: &LogKey, from: u64, to: u64) -> Result<Vec<Entry>, LogError> {
        match self.get(log_key).await {
            Some(log) => log.read_range(from, to).await,
            None => Ok(Vec::new()),
        }
    }

    /// Receive a [`DurableEvent`] for every entry stored from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DurableEvent> {
        self.events.subscribe()
    }

    /// Refuse further writes and wait for in-flight ones to finish.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let logs: Vec<Arc<Log>> = self.logs.read().await.values().cloned().collect();
        for log in logs {
            log.quiesce().await;
        }
        tracing::debug!("log store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.is_closed() {
            Err(LogError::Closed)
        } else {
            Ok(())
        }
    }
}
