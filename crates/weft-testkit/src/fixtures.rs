//! Test fixtures and helpers.
//!
//! A [`Space`] holds a genesis key and a roster of credentials it issued.
//! Peers opened from the space start with the roster admitted, so tests can
//! focus on replication instead of credential bootstrapping.

use std::sync::Arc;
use std::time::Duration;

use weft::{Engine, EngineConfig, Result};
use weft_core::{Capability, Credential, Entry, FieldValue, Keypair, KnowledgeVector, Op, PublicKey};
use weft_store::{MemoryStorage, Storage};
use weft_sync::{MemoryTransport, SessionReport, Transport};

/// How long helpers wait before giving up.
pub const WAIT: Duration = Duration::from_secs(10);

/// A space: a genesis key plus the credentials it handed out.
pub struct Space {
    pub genesis: Keypair,
    roster: Vec<Credential>,
}

impl Space {
    pub fn new(seed: u8) -> Self {
        Self {
            genesis: Keypair::from_seed(&[seed; 32]),
            roster: Vec::new(),
        }
    }

    pub fn genesis_key(&self) -> PublicKey {
        self.genesis.public_key()
    }

    /// Issue a root credential and add it to the roster.
    pub fn enroll(&mut self, subject: PublicKey, capability: Capability) -> Credential {
        let credential = Credential::issue(&self.genesis, subject, capability, None);
        self.roster.push(credential.clone());
        credential
    }

    pub fn roster(&self) -> &[Credential] {
        &self.roster
    }

    /// An enrolled writer with an in-memory engine.
    pub async fn writer(&mut self, seed: u8) -> Result<TestPeer> {
        let keypair = device(seed);
        self.enroll(keypair.public_key(), Capability::Write);
        self.open(keypair).await
    }

    /// A peer over fresh in-memory storage, with the roster admitted.
    pub async fn open(&self, keypair: Keypair) -> Result<TestPeer> {
        self.open_with(keypair, Arc::new(MemoryStorage::new()), EngineConfig::default())
            .await
    }

    /// A peer over `storage`, with the roster admitted.
    pub async fn open_with(
        &self,
        keypair: Keypair,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
    ) -> Result<TestPeer> {
        let engine = Engine::open(storage, keypair.clone(), self.genesis_key(), config).await?;
        engine.admit_chain(&self.roster)?;
        Ok(TestPeer { engine, keypair })
    }
}

/// A deterministic device keypair.
pub fn device(seed: u8) -> Keypair {
    let mut bytes = [0x5a; 32];
    bytes[0] = seed;
    Keypair::from_seed(&bytes)
}

/// One replica in a test.
pub struct TestPeer {
    pub engine: Engine,
    pub keypair: Keypair,
}

impl TestPeer {
    pub fn key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Set one field and return the entry index.
    pub async fn put(&self, object: &str, field: &str, value: impl Into<FieldValue>) -> Result<u64> {
        self.engine
            .propose_mutation(vec![Op::put(object, field, value)])
            .await
    }

    /// Wait until everything stored locally is applied.
    pub async fn settle(&self) -> Result<()> {
        let knowledge = self.engine.knowledge().await;
        self.engine.wait_until_applied(&knowledge, WAIT).await
    }

    pub async fn knowledge(&self) -> KnowledgeVector {
        self.engine.knowledge().await
    }

    /// Value of a field as text, for concise assertions.
    pub fn text(&self, object: &str, field: &str) -> Option<String> {
        match self.engine.state().get(object, field)? {
            FieldValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// Replicate between two peers over an in-memory transport until both have
/// caught up, then close both sessions.
pub async fn sync_pair(a: &TestPeer, b: &TestPeer) -> Result<(SessionReport, SessionReport)> {
    let (ta, tb) = MemoryTransport::pair(64);
    sync_over(a, b, Arc::new(ta), Arc::new(tb)).await
}

/// Like [`sync_pair`], over caller-supplied transport ends.
pub async fn sync_over(
    a: &TestPeer,
    b: &TestPeer,
    ta: Arc<dyn Transport>,
    tb: Arc<dyn Transport>,
) -> Result<(SessionReport, SessionReport)> {
    let sa = a.engine.start_session(ta)?;
    let sb = b.engine.start_session(tb)?;

    a.engine.wait_caught_up(sa, WAIT).await?;
    b.engine.wait_caught_up(sb, WAIT).await?;

    let ra = a.engine.close_session(sa).await?;
    let rb = b.engine.close_session(sb).await?;
    Ok((ra, rb))
}

/// `count` signed entries for `keypair`'s log, starting at `from`.
pub fn signed_entries(keypair: &Keypair, from: u64, count: u64) -> Vec<Entry> {
    (from..from + count)
        .map(|i| Entry::sign(keypair, i, format!("entry {}", i).into_bytes()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devices_are_distinct_and_stable() {
        assert_eq!(device(1).public_key(), device(1).public_key());
        assert_ne!(device(1).public_key(), device(2).public_key());
    }

    #[test]
    fn test_signed_entries_verify() {
        let kp = device(3);
        let entries = signed_entries(&kp, 2, 3);
        assert_eq!(entries.iter().map(|e| e.index).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(entries.iter().all(|e| e.verify().is_ok()));
    }

    #[tokio::test]
    async fn test_enrolled_writer_is_authorized() {
        let mut space = Space::new(0x77);
        let peer = space.writer(1).await.unwrap();

        assert!(peer.engine.keys().is_authorized(&peer.key(), Capability::Write));
        peer.put("o", "f", "v").await.unwrap();
        peer.settle().await.unwrap();
        assert_eq!(peer.text("o", "f").as_deref(), Some("v"));
    }
}
