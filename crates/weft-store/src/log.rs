//! A single append-only log.
//!
//! A [`Log`] is writable when it holds its writer's keypair, otherwise it
//! only accepts entries that someone else already signed. Appends and
//! ingests on one log are serialized through the log's length lock, so
//! indices always land in order and a duplicate is dropped by index.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{broadcast, Mutex};

use weft_core::{validate_entry, Entry, Keypair, LogKey, ValidationError};

use crate::error::{LogError, StoreError};
use crate::storage::{AppendResult, Storage};

/// Emitted after an entry is durably stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableEvent {
    pub log_key: LogKey,
    pub index: u64,
    /// Log length after this entry.
    pub len: u64,
}

/// Outcome of ingesting a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored at the contained index.
    Appended(u64),
    /// The log already held this index.
    Duplicate,
}

pub struct Log {
    log_key: LogKey,
    secret: OnceLock<Keypair>,
    storage: Arc<dyn Storage>,
    /// Guards the next index. Held across the durable write.
    len: Mutex<u64>,
    durable_len: AtomicU64,
    events: broadcast::Sender<DurableEvent>,
    closed: Arc<AtomicBool>,
}

impl Log {
    pub(crate) fn new(
        log_key: LogKey,
        storage: Arc<dyn Storage>,
        len: u64,
        events: broadcast::Sender<DurableEvent>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            log_key,
            secret: OnceLock::new(),
            storage,
            len: Mutex::new(len),
            durable_len: AtomicU64::new(len),
            events,
            closed,
        }
    }

    pub fn key(&self) -> LogKey {
        self.log_key
    }

    /// Whether this replica can append to the log.
    pub fn is_writable(&self) -> bool {
        self.secret.get().is_some()
    }

    /// Make the log writable by supplying its keypair.
    pub fn attach_secret(&self, keypair: Keypair) -> Result<(), LogError> {
        if keypair.public_key() != self.log_key {
            return Err(LogError::KeyMismatch(self.log_key));
        }
        // A second attach carries the same key.
        let _ = self.secret.set(keypair);
        Ok(())
    }

    /// Number of durably stored entries.
    pub fn len(&self) -> u64 {
        self.durable_len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sign `payload` as the next entry and persist it.
    ///
    /// Returns only once the entry is durable. The index is not visible to
    /// readers before that.
    pub async fn append(&self, payload: impl Into<Bytes>) -> Result<u64, LogError> {
        let keypair = self
            .secret
            .get()
            .ok_or(LogError::PermissionDenied(self.log_key))?;

        let mut len = self.len.lock().await;
        self.ensure_open()?;

        let entry = Entry::sign(keypair, *len, payload);
        self.persist(&entry, &mut len).await?;
        Ok(entry.index)
    }

    /// Store an entry signed elsewhere.
    ///
    /// The signature is checked before anything is written. An entry below
    /// the current length is a duplicate. One above it is a gap and is not
    /// buffered.
    pub async fn ingest(&self, entry: Entry) -> Result<IngestOutcome, LogError> {
        // Signature first, outside the lock. The position is rechecked below.
        match validate_entry(&entry, &self.log_key, self.len()) {
            Ok(_) | Err(ValidationError::SequenceGap { .. }) => {}
            Err(e) => {
                return Err(LogError::Verification {
                    log_key: self.log_key,
                    index: entry.index,
                    reason: e.to_string(),
                })
            }
        }

        let mut len = self.len.lock().await;
        self.ensure_open()?;

        if entry.index < *len {
            return Ok(IngestOutcome::Duplicate);
        }
        if entry.index > *len {
            return Err(LogError::SequenceGap {
                log_key: self.log_key,
                expected: *len,
                got: entry.index,
            });
        }

        self.persist(&entry, &mut len).await?;
        Ok(IngestOutcome::Appended(entry.index))
    }

    /// Entries `from..to`, clamped to the durable length.
    pub async fn read_range(&self, from: u64, to: u64) -> Result<Vec<Entry>, LogError> {
        let to = to.min(self.len());
        if from >= to {
            return Ok(Vec::new());
        }

        let raw = self.storage.read_range(&self.log_key, from, to).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (offset, bytes) in raw.iter().enumerate() {
            let entry = Entry::from_bytes(bytes)?;
            let expected = from + offset as u64;
            if entry.log_key != self.log_key || entry.index != expected {
                return Err(StoreError::InvalidData(format!(
                    "log {} slot {} holds index {} of log {}",
                    self.log_key, expected, entry.index, entry.log_key
                ))
                .into());
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// A single entry, if stored.
    pub async fn get(&self, index: u64) -> Result<Option<Entry>, LogError> {
        Ok(self.read_range(index, index + 1).await?.pop())
    }

    /// Wait for any in-flight append or ingest to finish.
    pub(crate) async fn quiesce(&self) {
        let _len = self.len.lock().await;
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.closed.load(Ordering::Acquire) {
            Err(LogError::Closed)
        } else {
            Ok(())
        }
    }

    async fn persist(&self, entry: &Entry, len: &mut u64) -> Result<(), LogError> {
        let bytes = entry.to_bytes();
        match self
            .storage
            .append_durable(&self.log_key, entry.index, &bytes)
            .await?
        {
            AppendResult::Appended | AppendResult::AlreadyExists => {}
            AppendResult::Conflict => {
                return Err(StoreError::InvalidData(format!(
                    "log {} already holds a different entry at index {}",
                    self.log_key, entry.index
                ))
                .into())
            }
        }

        *len = entry.index + 1;
        self.durable_len.store(*len, Ordering::Release);

        tracing::trace!(log = %self.log_key, index = entry.index, "entry durable");
        // No subscribers is fine.
        let _ = self.events.send(DurableEvent {
            log_key: self.log_key,
            index: entry.index,
            len: *len,
        });
        Ok(())
    }
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("log_key", &self.log_key)
            .field("len", &self.len())
            .field("writable", &self.is_writable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use weft_core::Signature;

    fn log_for(kp: &Keypair) -> (Log, broadcast::Receiver<DurableEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let log = Log::new(
            kp.public_key(),
            Arc::new(MemoryStorage::new()),
            0,
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (log, rx)
    }

    #[tokio::test]
    async fn test_append_requires_secret() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (log, _rx) = log_for(&kp);

        assert!(matches!(
            log.append(&b"x"[..]).await,
            Err(LogError::PermissionDenied(_))
        ));

        log.attach_secret(kp).unwrap();
        assert_eq!(log.append(&b"x"[..]).await.unwrap(), 0);
        assert_eq!(log.append(&b"y"[..]).await.unwrap(), 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_attach_wrong_secret() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (log, _rx) = log_for(&kp);
        let other = Keypair::from_seed(&[2; 32]);
        assert!(matches!(
            log.attach_secret(other),
            Err(LogError::KeyMismatch(_))
        ));
        assert!(!log.is_writable());
    }

    #[tokio::test]
    async fn test_append_emits_event_after_durable() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (log, mut rx) = log_for(&kp);
        log.attach_secret(kp.clone()).unwrap();

        log.append(&b"x"[..]).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.log_key, kp.public_key());
        assert_eq!(event.index, 0);
        assert_eq!(event.len, 1);
        assert_eq!(log.get(0).await.unwrap().unwrap().payload, Bytes::from("x"));
    }

    #[tokio::test]
    async fn test_ingest_sequence() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (log, _rx) = log_for(&kp);

        let e0 = Entry::sign(&kp, 0, &b"a"[..]);
        let e1 = Entry::sign(&kp, 1, &b"b"[..]);
        let e2 = Entry::sign(&kp, 2, &b"c"[..]);

        assert!(matches!(
            log.ingest(e1.clone()).await,
            Err(LogError::SequenceGap { expected: 0, got: 1, .. })
        ));
        assert_eq!(log.ingest(e0.clone()).await.unwrap(), IngestOutcome::Appended(0));
        assert_eq!(log.ingest(e0).await.unwrap(), IngestOutcome::Duplicate);
        assert_eq!(log.ingest(e1).await.unwrap(), IngestOutcome::Appended(1));
        assert_eq!(log.ingest(e2).await.unwrap(), IngestOutcome::Appended(2));

        let entries = log.read_range(0, 10).await.unwrap();
        let indices: Vec<u64> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_signature() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (log, _rx) = log_for(&kp);

        let mut forged = Entry::sign(&kp, 0, &b"a"[..]);
        forged.signature = Signature::ZERO;

        let err = log.ingest(forged).await.unwrap_err();
        assert!(matches!(err, LogError::Verification { index: 0, .. }));
        assert!(err.is_recoverable());
        assert_eq!(log.len(), 0);
    }

    #[tokio::test]
    async fn test_ingest_rejects_foreign_entry() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (log, _rx) = log_for(&kp);
        let other = Keypair::from_seed(&[2; 32]);

        let entry = Entry::sign(&other, 0, &b"a"[..]);
        assert!(matches!(
            log.ingest(entry).await,
            Err(LogError::Verification { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_log_refuses_writes() {
        let kp = Keypair::from_seed(&[1; 32]);
        let (tx, _rx) = broadcast::channel(4);
        let closed = Arc::new(AtomicBool::new(false));
        let log = Log::new(
            kp.public_key(),
            Arc::new(MemoryStorage::new()),
            0,
            tx,
            closed.clone(),
        );
        log.attach_secret(kp).unwrap();

        closed.store(true, Ordering::Release);
        assert!(matches!(log.append(&b"x"[..]).await, Err(LogError::Closed)));
    }
}
