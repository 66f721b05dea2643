//! Convergence verification.
//!
//! After replicating, two replicas can check they hold the same entries by
//! comparing knowledge vectors and deterministic digests instead of the
//! entries themselves.

use weft_core::{Blake3Hash, KnowledgeVector, LogKey, LogRange};
use weft_store::LogStore;

use crate::error::Result;

const READ_CHUNK: u64 = 1024;

/// Rolling digest of one log's entries.
///
/// `H = Blake3("weft-log-v1:" || log_key || id_0 || id_1 || ...)`, over every
/// durable entry in index order. `None` for an empty or unknown log.
pub async fn log_digest(store: &LogStore, log_key: &LogKey) -> Result<Option<Blake3Hash>> {
    let len = store.knowledge().await.get(log_key);
    if len == 0 {
        return Ok(None);
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"weft-log-v1:");
    hasher.update(log_key.as_bytes());

    let mut from = 0;
    while from < len {
        let to = len.min(from + READ_CHUNK);
        let entries = store.read_range(log_key, from, to).await?;
        if entries.is_empty() {
            break;
        }
        for entry in &entries {
            hasher.update(entry.id().as_bytes());
        }
        from += entries.len() as u64;
    }

    Ok(Some(hasher.finalize().into()))
}

/// Digest over every non-empty log, in log key order.
pub async fn state_digest(store: &LogStore) -> Result<Blake3Hash> {
    let knowledge = store.knowledge().await;

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"weft-state-v1:");
    for log_key in knowledge.logs() {
        if let Some(digest) = log_digest(store, log_key).await? {
            hasher.update(log_key.as_bytes());
            hasher.update(digest.as_bytes());
        }
    }

    Ok(hasher.finalize().into())
}

/// Result of convergence verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    /// Both replicas know the same entries.
    Converged,
    /// Knowledge differs; the ranges each side lacks.
    Diverged {
        local_missing: Vec<LogRange>,
        remote_missing: Vec<LogRange>,
    },
    /// Equal knowledge but different contents. Only possible if a writer
    /// signed two different entries at one index.
    Mismatch { reason: String },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceResult::Converged)
    }
}

/// Compare two knowledge vectors.
pub fn compare_knowledge(local: &KnowledgeVector, remote: &KnowledgeVector) -> ConvergenceResult {
    let local_missing = local.diff(remote);
    let remote_missing = remote.diff(local);
    if local_missing.is_empty() && remote_missing.is_empty() {
        ConvergenceResult::Converged
    } else {
        ConvergenceResult::Diverged {
            local_missing,
            remote_missing,
        }
    }
}

/// Verify the local store against a remote's knowledge and, optionally, its
/// state digest.
pub async fn verify_convergence(
    local: &LogStore,
    remote_knowledge: &KnowledgeVector,
    remote_digest: Option<&Blake3Hash>,
) -> Result<ConvergenceResult> {
    let knowledge = local.knowledge().await;
    let result = compare_knowledge(&knowledge, remote_knowledge);
    if !result.is_converged() {
        return Ok(result);
    }

    if let Some(remote_digest) = remote_digest {
        let local_digest = state_digest(local).await?;
        if &local_digest != remote_digest {
            return Ok(ConvergenceResult::Mismatch {
                reason: format!(
                    "state digest mismatch: local={}, remote={}",
                    local_digest.to_hex(),
                    remote_digest.to_hex()
                ),
            });
        }
    }

    Ok(ConvergenceResult::Converged)
}
