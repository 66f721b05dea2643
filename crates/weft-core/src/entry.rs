//! Entry: one signed, indexed unit of data in a log.
//!
//! An entry is immutable once accepted. Its signature covers the canonical
//! encoding of `(log_key, index, payload)` and must verify against `log_key`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{decode_entry, encode_entry, entry_signing_bytes};
use crate::crypto::{Blake3Hash, Keypair, Signature};
use crate::error::CoreError;
use crate::types::LogKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The log (and writer) this entry belongs to.
    pub log_key: LogKey,

    /// Position within the log, starting at 0.
    pub index: u64,

    /// Opaque payload bytes; see [`crate::EntryPayload`].
    pub payload: Bytes,

    /// Ed25519 signature by `log_key` over the signing bytes.
    pub signature: Signature,
}

impl Entry {
    /// Build and sign an entry with the log owner's keypair.
    pub fn sign(keypair: &Keypair, index: u64, payload: impl Into<Bytes>) -> Self {
        let log_key = keypair.public_key();
        let payload = payload.into();
        let signature = keypair.sign(&entry_signing_bytes(&log_key, index, &payload));

        Self {
            log_key,
            index,
            payload,
            signature,
        }
    }

    /// The bytes the signature covers.
    pub fn signing_bytes(&self) -> Vec<u8> {
        entry_signing_bytes(&self.log_key, self.index, &self.payload)
    }

    /// Check the signature against the entry's own log key.
    pub fn verify(&self) -> Result<(), CoreError> {
        self.log_key.verify(&self.signing_bytes(), &self.signature)
    }

    /// Canonical encoding used for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_entry(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        decode_entry(bytes)
    }

    /// Content hash of the canonical encoding.
    pub fn id(&self) -> Blake3Hash {
        Blake3Hash::hash(&self.to_bytes())
    }

    /// Approximate in-memory footprint, used for flow control accounting.
    pub fn size_hint(&self) -> usize {
        self.payload.len() + 32 + 64 + 8
    }
}
