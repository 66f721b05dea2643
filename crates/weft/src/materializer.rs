//! Folds durable log entries into the document.
//!
//! One consumer task reads every entry once it is durable, decodes its
//! payload and, in per-log index order, merges mutations into the
//! [`Document`]. Two cursors per log track progress:
//!
//! - **observed**: entries decoded. Credentials are admitted at this point,
//!   so a grant takes effect even while its log is blocked.
//! - **applied**: entries whose effect on the document is final. A mutation
//!   from a log whose writer lacks `Write` blocks that log at its index.
//!   Only the index is kept. Once a credential admits the writer, the rest
//!   of the log is re-read from the store and applied.
//!
//! The Lamport clock only moves for applied mutations and for the device's
//! own log, so held entries cannot push local writes around.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use weft_core::{Capability, Entry, EntryPayload, KnowledgeVector, LogKey, LogRange, Mutation};
use weft_perms::KeyManager;
use weft_store::{DurableEvent, LogStore};

use crate::config::MaterializerConfig;
use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::subscription::{StateChange, Subscription, SubscriptionRegistry};

struct Shared {
    document: RwLock<Arc<Document>>,
    applied: watch::Sender<KnowledgeVector>,
    observed: watch::Sender<KnowledgeVector>,
    /// Highest Lamport clock applied or handed out.
    lamport: AtomicU64,
    subscribers: Arc<SubscriptionRegistry>,
}

/// Handle to the materializer task.
pub struct Materializer {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Materializer {
    /// Start materializing `store`, beginning with every entry it already
    /// holds.
    pub fn spawn(store: Arc<LogStore>, keys: Arc<KeyManager>, config: MaterializerConfig) -> Self {
        let shared = Arc::new(Shared {
            document: RwLock::new(Arc::new(Document::new())),
            applied: watch::channel(KnowledgeVector::new()).0,
            observed: watch::channel(KnowledgeVector::new()).0,
            lamport: AtomicU64::new(0),
            subscribers: SubscriptionRegistry::new(),
        });

        // Subscribe before the initial scan so nothing is missed in between.
        let events = store.subscribe();
        let admissions = keys.watch_admissions();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = Worker {
            store,
            keys,
            config,
            shared: shared.clone(),
            blocked: BTreeMap::new(),
            observed: KnowledgeVector::new(),
            applied: KnowledgeVector::new(),
        };
        let task = tokio::spawn(
            worker
                .run(events, admissions, shutdown_rx)
                .instrument(tracing::info_span!("materializer")),
        );

        Self {
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Snapshot of the current document.
    pub fn state(&self) -> Arc<Document> {
        self.shared
            .document
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Call `listener` with every applied change until the handle drops.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(listener)
    }

    pub fn applied(&self) -> KnowledgeVector {
        self.shared.applied.borrow().clone()
    }

    pub fn observed(&self) -> KnowledgeVector {
        self.shared.observed.borrow().clone()
    }

    pub fn watch_applied(&self) -> watch::Receiver<KnowledgeVector> {
        self.shared.applied.subscribe()
    }

    /// Reserve a Lamport clock greater than any applied so far. Saturates
    /// at `u64::MAX`, where writes fall back to the stamp's tie-breakers.
    pub fn next_lamport(&self) -> u64 {
        let previous = self
            .shared
            .lamport
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |clock| {
                Some(clock.saturating_add(1))
            })
            .unwrap_or_else(|clock| clock);
        previous.saturating_add(1)
    }

    /// Wait until the applied vector dominates `target`.
    pub async fn wait_until_applied(&self, target: &KnowledgeVector, timeout: Duration) -> Result<()> {
        wait_dominates(self.shared.applied.subscribe(), target, timeout).await
    }

    /// Wait until the observed vector dominates `target`.
    pub async fn wait_until_observed(&self, target: &KnowledgeVector, timeout: Duration) -> Result<()> {
        wait_dominates(self.shared.observed.subscribe(), target, timeout).await
    }

    /// Stop the consumer task and wait for it.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "materializer task failed");
            }
        }
    }
}

impl Drop for Materializer {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

async fn wait_dominates(
    mut progress: watch::Receiver<KnowledgeVector>,
    target: &KnowledgeVector,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, progress.wait_for(|kv| kv.dominates(target))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => Err(EngineError::Closed),
        Err(_) => Err(EngineError::Timeout(timeout)),
    }
}

struct Worker {
    store: Arc<LogStore>,
    keys: Arc<KeyManager>,
    config: MaterializerConfig,
    shared: Arc<Shared>,
    /// First unapplied index of each log held back by an unauthorized
    /// mutation. Entries past it are re-read from the store on replay.
    blocked: BTreeMap<LogKey, u64>,
    observed: KnowledgeVector,
    applied: KnowledgeVector,
}

impl Worker {
    async fn run(
        mut self,
        mut events: broadcast::Receiver<DurableEvent>,
        mut admissions: watch::Receiver<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.rescan().await;
        let mut admissions_open = true;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.catch_up(event.log_key, event.len).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "durable events lagged, rescanning");
                        self.rescan().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = admissions.changed(), if admissions_open => {
                    if changed.is_err() {
                        admissions_open = false;
                    } else {
                        self.replay().await;
                        self.publish();
                    }
                }
            }
        }
        tracing::debug!(applied = self.applied.total_entries(), "materializer stopped");
    }

    async fn rescan(&mut self) {
        let knowledge = self.store.knowledge().await;
        let logs: Vec<(LogKey, u64)> = knowledge.iter().map(|(k, len)| (*k, *len)).collect();
        for (log_key, len) in logs {
            self.catch_up(log_key, len).await;
        }
    }

    /// Decode `log_key` up to `len` and apply what is authorized.
    async fn catch_up(&mut self, log_key: LogKey, len: u64) {
        let mut admitted = false;
        while self.observed.get(&log_key) < len {
            let from = self.observed.get(&log_key);
            let to = len.min(from.saturating_add(self.config.read_batch));
            let entries = match self.store.read_range(&log_key, from, to).await {
                Ok(entries) if !entries.is_empty() => entries,
                Ok(_) => break,
                Err(e) => {
                    tracing::error!(log = %log_key, from, error = %e, "failed to read entries");
                    break;
                }
            };
            for entry in entries {
                admitted |= self.decode(entry);
            }
        }

        if admitted {
            self.replay().await;
        }
        self.publish();
    }

    /// Observe one entry and apply it unless its log is blocked. Returns
    /// whether it admitted any credential.
    fn decode(&mut self, entry: Entry) -> bool {
        let log_key = entry.log_key;
        let index = entry.index;
        self.observed.advance(log_key, index + 1);

        let (mutation, admitted) = match EntryPayload::from_bytes(&entry.payload) {
            Ok(EntryPayload::Mutation(mutation)) => {
                // Our own log keeps the clock monotonic across restarts even
                // while it is held.
                if log_key == self.keys.device_key() {
                    self.shared.lamport.fetch_max(mutation.lamport, Ordering::AcqRel);
                }
                (Some(mutation), false)
            }
            Ok(EntryPayload::Credential(credential)) => {
                match self.keys.admit_or_defer(&credential) {
                    Ok(admitted) => (None, !admitted.is_empty()),
                    Err(e) => {
                        tracing::warn!(log = %log_key, index, error = %e, "credential rejected");
                        (None, false)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(log = %log_key, index, error = %e, "skipping undecodable payload");
                (None, false)
            }
        };

        if !self.blocked.contains_key(&log_key) {
            self.apply(log_key, index, mutation.as_ref());
        }
        admitted
    }

    /// Apply the entry at `index`, the next one in `log_key`'s order. A
    /// mutation its writer may not make blocks the log there instead.
    fn apply(&mut self, log_key: LogKey, index: u64, mutation: Option<&Mutation>) -> bool {
        if let Some(mutation) = mutation {
            if !self.keys.is_authorized(&log_key, Capability::Write) {
                tracing::debug!(log = %log_key, index, "writer not authorized, holding entries");
                self.blocked.insert(log_key, index);
                return false;
            }

            self.shared.lamport.fetch_max(mutation.lamport, Ordering::AcqRel);
            let fields = {
                let mut document = self
                    .shared
                    .document
                    .write()
                    .unwrap_or_else(|e| e.into_inner());
                Arc::make_mut(&mut document).apply(log_key, index, mutation)
            };
            tracing::trace!(log = %log_key, index, changed = fields.len(), "mutation applied");
            if !fields.is_empty() {
                self.shared.subscribers.notify(&StateChange {
                    log_key,
                    index,
                    fields,
                });
            }
        }
        self.applied.advance(log_key, index + 1);
        true
    }

    /// Resume every blocked log whose writer is now authorized.
    async fn replay(&mut self) {
        let ready: Vec<(LogKey, u64)> = self
            .blocked
            .iter()
            .filter(|(key, _)| self.keys.is_authorized(key, Capability::Write))
            .map(|(key, from)| (*key, *from))
            .collect();
        for (log_key, from) in ready {
            self.blocked.remove(&log_key);
            self.resume(log_key, from).await;
        }
    }

    /// Re-read `log_key` from `from` up to the observed cursor and apply it.
    /// Credentials in the range were admitted when first observed.
    async fn resume(&mut self, log_key: LogKey, from: u64) {
        let held = LogRange {
            log_key,
            from,
            to: self.observed.get(&log_key),
        };
        tracing::debug!(log = %log_key, from, to = held.to, "replaying held entries");

        for chunk in held.chunks(self.config.read_batch) {
            let entries = match self.store.read_range(&log_key, chunk.from, chunk.to).await {
                Ok(entries) if entries.len() as u64 == chunk.len() => entries,
                Ok(_) => {
                    tracing::error!(
                        log = %log_key,
                        from = chunk.from,
                        "held entries missing from store"
                    );
                    self.blocked.insert(log_key, chunk.from);
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        log = %log_key,
                        from = chunk.from,
                        error = %e,
                        "failed to re-read entries"
                    );
                    self.blocked.insert(log_key, chunk.from);
                    return;
                }
            };
            for entry in entries {
                let mutation = match EntryPayload::from_bytes(&entry.payload) {
                    Ok(EntryPayload::Mutation(mutation)) => Some(mutation),
                    _ => None,
                };
                if !self.apply(log_key, entry.index, mutation.as_ref()) {
                    return;
                }
            }
        }
    }

    fn publish(&self) {
        publish(&self.shared.observed, &self.observed);
        publish(&self.shared.applied, &self.applied);
    }
}

fn publish(sender: &watch::Sender<KnowledgeVector>, value: &KnowledgeVector) {
    sender.send_if_modified(|current| {
        if current == value {
            false
        } else {
            *current = value.clone();
            true
        }
    });
}
