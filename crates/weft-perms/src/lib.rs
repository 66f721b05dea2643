//! # Weft Permissions
//!
//! Device keys, credential admission, and sealed keystores.
//!
//! ## Overview
//!
//! A space is rooted at a genesis key. Every other key gains a
//! [`Capability`](weft_core::Capability) through a chain of signed
//! credentials leading back to that key. The [`KeyManager`] admits
//! credentials only when the whole chain verifies, and answers whether a
//! log's writer may currently write.
//!
//! ## Key Concepts
//!
//! - **Root credential**: issued by the genesis key, no parent
//! - **Delegated credential**: issued by a key holding an admitted Admin
//!   credential, which it names as parent
//! - **Deferred credential**: arrived before its parent; admitted once the
//!   parent is
//! - **Sealed keypair**: a device seed encrypted under a passphrase
//!
//! ## Usage
//!
//! ```rust,no_run
//! use weft_core::{Capability, Credential, Keypair};
//! use weft_perms::KeyManager;
//!
//! let genesis = Keypair::generate();
//! let device = Keypair::generate();
//! let km = KeyManager::new(device.clone(), genesis.public_key());
//! assert!(!km.is_authorized(&device.public_key(), Capability::Write));
//!
//! let cred = Credential::issue(&genesis, device.public_key(), Capability::Write, None);
//! km.admit(&cred).unwrap();
//! assert!(km.is_authorized(&device.public_key(), Capability::Write));
//! ```

pub mod crypto;
pub mod error;
pub mod keystore;
pub mod manager;
pub mod state;

pub use crypto::{EncryptionKey, EncryptionNonce};
pub use error::{PermsError, Result};
pub use keystore::SealedKeypair;
pub use manager::KeyManager;
pub use state::{Admission, AdmittedCredential, CredentialState};
