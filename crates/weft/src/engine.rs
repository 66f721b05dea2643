//! The Engine: one replica of one space.
//!
//! The engine owns the log store, the key manager, the materializer and the
//! table of running replication sessions. Local writes go to this device's
//! log and reach the document through the same durable-entry pipeline as
//! remote ones.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use weft_core::{
    Blake3Hash, Capability, Credential, EntryPayload, Keypair, KnowledgeVector, Mutation, Op,
    PublicKey,
};
use weft_perms::{KeyManager, SealedKeypair};
use weft_store::{Log, LogStore, MemoryStorage, SqliteStorage, Storage};
use weft_sync::{
    state_digest, ReplicationSession, SessionHandle, SessionId, SessionReport, SessionStatus,
    SyncError, Transport,
};

use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::{EngineError, Result};
use crate::materializer::Materializer;
use crate::subscription::{StateChange, Subscription};

pub struct Engine {
    store: Arc<LogStore>,
    keys: Arc<KeyManager>,
    materializer: Materializer,
    /// This device's writable log.
    local_log: Arc<Log>,
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    config: EngineConfig,
    closed: AtomicBool,
}

impl Engine {
    /// Open a replica over `storage`.
    ///
    /// Every log already in storage is reopened read-only, this device's own
    /// log becomes writable again, and the document is rebuilt from the
    /// stored entries.
    pub async fn open(
        storage: Arc<dyn Storage>,
        device: Keypair,
        genesis: PublicKey,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LogStore::open(storage, config.store.clone()).await?);
        let local_log = store.create(device.clone()).await?;
        let keys = Arc::new(KeyManager::new(device, genesis));
        let materializer =
            Materializer::spawn(store.clone(), keys.clone(), config.materializer.clone());

        tracing::info!(
            device = %keys.device_key(),
            genesis = %genesis,
            logs = store.list().await.len(),
            "engine opened"
        );

        Ok(Self {
            store,
            keys,
            materializer,
            local_log,
            sessions: Mutex::new(HashMap::new()),
            config,
            closed: AtomicBool::new(false),
        })
    }

    /// Open a replica that keeps nothing on disk.
    pub async fn open_in_memory(device: Keypair, genesis: PublicKey) -> Result<Self> {
        Self::open(
            Arc::new(MemoryStorage::new()),
            device,
            genesis,
            EngineConfig::default(),
        )
        .await
    }

    /// Open a replica backed by the SQLite database at `path`.
    pub async fn open_path(
        path: impl AsRef<Path>,
        device: Keypair,
        genesis: PublicKey,
        config: EngineConfig,
    ) -> Result<Self> {
        let storage = SqliteStorage::open(path)?;
        Self::open(Arc::new(storage), device, genesis, config).await
    }

    pub fn device_key(&self) -> PublicKey {
        self.keys.device_key()
    }

    pub fn genesis(&self) -> PublicKey {
        self.keys.genesis()
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Append a mutation to this device's log.
    ///
    /// Returns the entry index. The document reflects the change once the
    /// materializer applies it, and only if this device may write.
    pub async fn propose_mutation(&self, ops: Vec<Op>) -> Result<u64> {
        self.ensure_open()?;
        if ops.is_empty() {
            return Err(EngineError::InvalidOperation("mutation has no ops".into()));
        }

        let mutation = Mutation::new(self.materializer.next_lamport(), ops);
        let lamport = mutation.lamport;
        let payload = EntryPayload::Mutation(mutation).to_bytes()?;
        let index = self.local_log.append(payload).await?;

        tracing::debug!(index, lamport, "mutation proposed");
        Ok(index)
    }

    /// Grant `capability` to `subject` and publish the credential in this
    /// device's log. The grant takes effect locally once the entry is
    /// durable.
    ///
    /// The genesis device issues root credentials. Any other device needs an
    /// admitted Admin credential, which it cites as the parent.
    pub async fn grant(&self, subject: PublicKey, capability: Capability) -> Result<Credential> {
        self.ensure_open()?;

        let parent = if self.keys.device_key() == self.keys.genesis() {
            None
        } else {
            let parent = self.keys.own_admin_credential().ok_or_else(|| {
                EngineError::NotAuthorized("this device holds no admin credential".into())
            })?;
            Some(parent)
        };

        // Admitted only once durable, so a failed append grants nothing.
        let credential = self.keys.issue(subject, capability, parent);
        let payload = EntryPayload::Credential(credential.clone()).to_bytes()?;
        let index = self.local_log.append(payload).await?;
        self.keys.admit(&credential)?;

        tracing::info!(subject = %subject, capability = ?capability, index, "credential granted");
        Ok(credential)
    }

    /// Admit a credential received out of band.
    ///
    /// A credential whose parent is unknown waits for it. Returns how many
    /// credentials became admitted.
    pub fn admit(&self, credential: &Credential) -> Result<usize> {
        Ok(self.keys.admit_or_defer(credential)?.len())
    }

    /// Admit an ordered chain, all or nothing.
    pub fn admit_chain(&self, credentials: &[Credential]) -> Result<usize> {
        Ok(self.keys.admit_chain(credentials)?)
    }

    /// Export the device keypair sealed under `passphrase`.
    pub fn seal_device_key(&self, passphrase: &[u8]) -> Result<SealedKeypair> {
        Ok(SealedKeypair::seal(self.keys.device(), passphrase)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Snapshot of the materialized document.
    pub fn state(&self) -> Arc<Document> {
        self.materializer.state()
    }

    /// Call `listener` with every applied change until the handle drops.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.materializer.subscribe(listener)
    }

    /// Durable length of every log.
    pub async fn knowledge(&self) -> KnowledgeVector {
        self.store.knowledge().await
    }

    /// Entries applied to the document, per log.
    pub fn applied(&self) -> KnowledgeVector {
        self.materializer.applied()
    }

    /// Entries decoded by the materializer, per log.
    pub fn observed(&self) -> KnowledgeVector {
        self.materializer.observed()
    }

    pub async fn wait_until_applied(&self, target: &KnowledgeVector, timeout: Duration) -> Result<()> {
        self.materializer.wait_until_applied(target, timeout).await
    }

    pub async fn wait_until_observed(&self, target: &KnowledgeVector, timeout: Duration) -> Result<()> {
        self.materializer.wait_until_observed(target, timeout).await
    }

    /// Digest over every stored log, equal on replicas holding the same
    /// entries.
    pub async fn digest(&self) -> Result<Blake3Hash> {
        Ok(state_digest(&self.store).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Start replicating with the peer at the other end of `transport`.
    pub fn start_session(&self, transport: Arc<dyn Transport>) -> Result<SessionId> {
        self.ensure_open()?;

        let session = ReplicationSession::new(
            self.store.clone(),
            transport,
            self.keys.device_key(),
            self.config.session.clone(),
        )?;
        let handle = session.spawn();
        let id = handle.id();

        tracing::info!(session = %id, "session started");
        self.lock_sessions().insert(id, handle);
        Ok(id)
    }

    /// Every session not yet closed through [`Engine::close_session`].
    pub fn sessions(&self) -> Vec<(SessionId, SessionStatus)> {
        let mut sessions: Vec<_> = self
            .lock_sessions()
            .iter()
            .map(|(id, handle)| (*id, handle.status()))
            .collect();
        sessions.sort_by_key(|(id, _)| *id);
        sessions
    }

    pub fn session_status(&self, id: SessionId) -> Option<SessionStatus> {
        self.lock_sessions().get(&id).map(|h| h.status())
    }

    /// Wait until a session has caught up with its peer.
    pub async fn wait_caught_up(&self, id: SessionId, timeout: Duration) -> Result<()> {
        let mut status = self
            .lock_sessions()
            .get(&id)
            .map(|h| h.watch_status())
            .ok_or(EngineError::SessionNotFound(id))?;

        let waited = tokio::time::timeout(
            timeout,
            status.wait_for(|s| s.caught_up || s.state.is_terminal()),
        )
        .await;
        match waited {
            Ok(Ok(current)) if current.caught_up => Ok(()),
            Ok(_) => Err(EngineError::Sync(SyncError::Cancelled)),
            Err(_) => Err(EngineError::Timeout(timeout)),
        }
    }

    /// Close a session and return its report.
    pub async fn close_session(&self, id: SessionId) -> Result<SessionReport> {
        let handle = self
            .lock_sessions()
            .remove(&id)
            .ok_or(EngineError::SessionNotFound(id))?;
        Ok(handle.close().await?)
    }

    /// Cancel every session, stop the materializer and close the store.
    ///
    /// In-flight appends finish before this returns.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let handles: Vec<SessionHandle> = self.lock_sessions().drain().map(|(_, h)| h).collect();
        for handle in handles {
            let id = handle.id();
            match handle.close().await {
                Ok(report) => tracing::debug!(
                    session = %id,
                    received = report.entries_received,
                    "session closed"
                ),
                Err(e) => tracing::warn!(session = %id, error = %e, "session ended with error"),
            }
        }

        self.materializer.shutdown().await;
        self.store.close().await;
        tracing::info!(device = %self.keys.device_key(), "engine closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.keys.device_key())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use weft_core::FieldValue;
    use weft_sync::MemoryTransport;

    const WAIT: Duration = Duration::from_secs(5);

    async fn genesis_engine() -> (Engine, Keypair) {
        let genesis = Keypair::from_seed(&[0x10; 32]);
        let engine = Engine::open_in_memory(genesis.clone(), genesis.public_key())
            .await
            .unwrap();
        (engine, genesis)
    }

    #[tokio::test]
    async fn test_propose_reaches_state() {
        let (engine, _) = genesis_engine().await;
        let index = engine
            .propose_mutation(vec![Op::put("note", "body", "hi")])
            .await
            .unwrap();
        assert_eq!(index, 0);

        engine
            .wait_until_applied(&engine.knowledge().await, WAIT)
            .await
            .unwrap();
        assert_eq!(engine.state().get("note", "body"), Some(&FieldValue::from("hi")));
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_local_writes_are_ordered() {
        let (engine, _) = genesis_engine().await;
        engine.propose_mutation(vec![Op::put("n", "v", 1i64)]).await.unwrap();
        engine.propose_mutation(vec![Op::put("n", "v", 2i64)]).await.unwrap();

        engine
            .wait_until_applied(&engine.knowledge().await, WAIT)
            .await
            .unwrap();
        assert_eq!(engine.state().get("n", "v"), Some(&FieldValue::Int(2)));
    }

    #[tokio::test]
    async fn test_empty_mutation_rejected() {
        let (engine, _) = genesis_engine().await;
        assert!(matches!(
            engine.propose_mutation(vec![]).await,
            Err(EngineError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_grant() {
        let genesis = Keypair::from_seed(&[0x10; 32]);
        let device = Keypair::from_seed(&[0x11; 32]);
        let engine = Engine::open_in_memory(device, genesis.public_key())
            .await
            .unwrap();

        let err = engine
            .grant(Keypair::from_seed(&[0x12; 32]).public_key(), Capability::Write)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    /// Memory storage whose appends fail once `failing` is set.
    struct FlakyStorage {
        inner: MemoryStorage,
        failing: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Storage for FlakyStorage {
        async fn append_durable(
            &self,
            log_key: &weft_core::LogKey,
            index: u64,
            bytes: &[u8],
        ) -> weft_store::Result<weft_store::AppendResult> {
            if self.failing.load(Ordering::Acquire) {
                return Err(weft_store::StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.append_durable(log_key, index, bytes).await
        }

        async fn read_range(
            &self,
            log_key: &weft_core::LogKey,
            from: u64,
            to: u64,
        ) -> weft_store::Result<Vec<bytes::Bytes>> {
            self.inner.read_range(log_key, from, to).await
        }

        async fn len(&self, log_key: &weft_core::LogKey) -> weft_store::Result<u64> {
            self.inner.len(log_key).await
        }

        async fn register_log(&self, log_key: &weft_core::LogKey) -> weft_store::Result<()> {
            self.inner.register_log(log_key).await
        }

        async fn list_logs(&self) -> weft_store::Result<Vec<weft_core::LogKey>> {
            self.inner.list_logs().await
        }
    }

    #[tokio::test]
    async fn test_failed_grant_admits_nothing() {
        let genesis = Keypair::from_seed(&[0x10; 32]);
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            failing: AtomicBool::new(false),
        });
        let engine = Engine::open(
            storage.clone(),
            genesis.clone(),
            genesis.public_key(),
            EngineConfig::default(),
        )
        .await
        .unwrap();

        let subject = Keypair::from_seed(&[0x13; 32]).public_key();
        storage.failing.store(true, Ordering::Release);
        assert!(engine.grant(subject, Capability::Write).await.is_err());
        assert!(!engine.keys().is_authorized(&subject, Capability::Write));
        assert_eq!(engine.knowledge().await.get(&genesis.public_key()), 0);
    }

    #[tokio::test]
    async fn test_grant_admits_after_append() {
        let (engine, genesis) = genesis_engine().await;
        let subject = Keypair::from_seed(&[0x14; 32]).public_key();

        engine.grant(subject, Capability::Write).await.unwrap();
        assert!(engine.keys().is_authorized(&subject, Capability::Write));
        assert_eq!(engine.knowledge().await.get(&genesis.public_key()), 1);
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_engine_rejects_writes() {
        let (engine, _) = genesis_engine().await;
        engine.close().await.unwrap();
        engine.close().await.unwrap();

        let err = engine
            .propose_mutation(vec![Op::put("a", "b", true)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert!(engine
            .start_session(Arc::new(MemoryTransport::pair(1).0))
            .is_err());
    }

    #[tokio::test]
    async fn test_sessions_tracked_and_closed() {
        let (a, genesis) = genesis_engine().await;
        let b = Engine::open_in_memory(
            Keypair::from_seed(&[0x20; 32]),
            genesis.public_key(),
        )
        .await
        .unwrap();

        a.propose_mutation(vec![Op::put("x", "y", "z")]).await.unwrap();

        let (ta, tb) = MemoryTransport::pair(16);
        let sa = a.start_session(Arc::new(ta)).unwrap();
        let sb = b.start_session(Arc::new(tb)).unwrap();

        b.wait_caught_up(sb, WAIT).await.unwrap();
        assert_eq!(a.sessions().len(), 1);
        assert!(a.session_status(sa).is_some());

        b.wait_until_applied(&a.knowledge().await, WAIT).await.unwrap();
        assert_eq!(b.state().get("x", "y"), Some(&FieldValue::from("z")));

        let report = a.close_session(sa).await.unwrap();
        assert_eq!(report.entries_sent, 1);
        assert!(matches!(
            a.close_session(sa).await,
            Err(EngineError::SessionNotFound(_))
        ));

        b.close().await.unwrap();
        assert!(b.sessions().is_empty());
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_path_reopens_own_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        let genesis = Keypair::from_seed(&[0x10; 32]);

        let engine = Engine::open_path(&path, genesis.clone(), genesis.public_key(), EngineConfig::default())
            .await
            .unwrap();
        engine.propose_mutation(vec![Op::put("k", "v", 1i64)]).await.unwrap();
        engine.close().await.unwrap();
        drop(engine);

        let engine = Engine::open_path(&path, genesis.clone(), genesis.public_key(), EngineConfig::default())
            .await
            .unwrap();
        let index = engine.propose_mutation(vec![Op::put("k", "v", 2i64)]).await.unwrap();
        assert_eq!(index, 1);

        engine
            .wait_until_applied(&engine.knowledge().await, WAIT)
            .await
            .unwrap();
        assert_eq!(engine.state().get("k", "v"), Some(&FieldValue::Int(2)));
    }

    #[tokio::test]
    async fn test_sealed_device_key_opens() {
        let (engine, genesis) = genesis_engine().await;
        let sealed = engine.seal_device_key(b"passphrase").unwrap();
        let opened = sealed.open(b"passphrase").unwrap();
        assert_eq!(opened.public_key(), genesis.public_key());
    }
}
