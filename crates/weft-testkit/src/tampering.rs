//! Fault injection at the transport layer.
//!
//! [`TamperingTransport`] wraps a real transport and corrupts the signature
//! of one chosen entry as it goes out, so tests can watch the receiving
//! session reject it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use weft_core::{Entry, LogKey, Signature};
use weft_sync::{codec, Result, SyncMessage, Transport};

/// Corrupts outgoing copies of one entry.
pub struct TamperingTransport {
    inner: Arc<dyn Transport>,
    log_key: LogKey,
    index: u64,
    /// Copies left to corrupt. `u64::MAX` means every copy.
    remaining: AtomicU64,
    tampered: AtomicU64,
}

impl TamperingTransport {
    /// Corrupt every copy of entry `index` of `log_key`.
    pub fn new(inner: Arc<dyn Transport>, log_key: LogKey, index: u64) -> Self {
        Self {
            inner,
            log_key,
            index,
            remaining: AtomicU64::new(u64::MAX),
            tampered: AtomicU64::new(0),
        }
    }

    /// Only corrupt the first `n` copies.
    pub fn times(self, n: u64) -> Self {
        self.remaining.store(n, Ordering::SeqCst);
        self
    }

    /// How many copies were corrupted so far.
    pub fn tampered(&self) -> u64 {
        self.tampered.load(Ordering::SeqCst)
    }

    fn take_one(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u64::MAX => Some(u64::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }

    fn corrupt(&self, entries: &mut [Entry]) -> bool {
        let target = entries
            .iter_mut()
            .find(|e| e.log_key == self.log_key && e.index == self.index);
        match target {
            Some(entry) if self.take_one() => {
                entry.signature = Signature::ZERO;
                self.tampered.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(log = %self.log_key, index = self.index, "tampered with entry");
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Transport for TamperingTransport {
    async fn send(&self, frame: Bytes) -> Result<()> {
        let mut message = match codec::decode(&frame) {
            Ok(message) => message,
            Err(_) => return self.inner.send(frame).await,
        };

        let changed = match &mut message {
            SyncMessage::Entries { entries, .. } | SyncMessage::Push { entries, .. } => {
                self.corrupt(entries)
            }
            _ => false,
        };

        if changed {
            self.inner.send(codec::encode(&message)?).await
        } else {
            self.inner.send(frame).await
        }
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        self.inner.recv().await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
