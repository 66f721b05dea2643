//! Sealed device keystore.
//!
//! A device seed can be exported encrypted under a passphrase and imported
//! back on the same or another machine. The public key travels in the clear
//! and is bound into the ciphertext as associated data.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use weft_core::{Keypair, PublicKey};

use crate::crypto::{EncryptionKey, EncryptionNonce};
use crate::error::{PermsError, Result};

/// Current sealed keystore format.
pub const KEYSTORE_VERSION: u8 = 1;

/// A device keypair sealed under a passphrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKeypair {
    pub version: u8,
    pub public_key: PublicKey,
    pub salt: [u8; 16],
    pub nonce: EncryptionNonce,
    /// Encrypted 32-byte seed plus authentication tag.
    pub ciphertext: Vec<u8>,
}

impl SealedKeypair {
    /// Seal `keypair` under `passphrase`.
    pub fn seal(keypair: &Keypair, passphrase: &[u8]) -> Result<Self> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let nonce = EncryptionNonce::generate();
        let public_key = keypair.public_key();

        let key = EncryptionKey::derive_from_passphrase(passphrase, &salt);
        let ciphertext = key.encrypt(&keypair.seed(), public_key.as_bytes(), &nonce)?;

        Ok(Self {
            version: KEYSTORE_VERSION,
            public_key,
            salt,
            nonce,
            ciphertext,
        })
    }

    /// Recover the keypair. Fails on a wrong passphrase or tampered data.
    pub fn open(&self, passphrase: &[u8]) -> Result<Keypair> {
        if self.version != KEYSTORE_VERSION {
            return Err(PermsError::DecryptionError(format!(
                "unsupported keystore version {}",
                self.version
            )));
        }

        let key = EncryptionKey::derive_from_passphrase(passphrase, &self.salt);
        let seed = key.decrypt(&self.ciphertext, self.public_key.as_bytes(), &self.nonce)?;
        let seed: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| PermsError::DecryptionError("sealed seed has wrong length".into()))?;

        let keypair = Keypair::from_seed(&seed);
        if keypair.public_key() != self.public_key {
            return Err(PermsError::DecryptionError(
                "sealed seed does not match public key".into(),
            ));
        }
        Ok(keypair)
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}
