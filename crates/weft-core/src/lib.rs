//! # Weft Core
//!
//! Pure primitives for Weft: signed log entries, credentials, typed payloads
//! and knowledge vectors.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Entry`] - One signed, indexed unit of data in a log
//! - [`LogKey`] - A log's identifier: its writer's public key
//! - [`KnowledgeVector`] - How many entries are known per log
//! - [`EntryPayload`] - What an entry carries: a [`Mutation`] or a [`Credential`]
//! - [`Credential`] - Signed authorization chained back to a genesis key
//!
//! ## Canonicalization
//!
//! Signed and hashed structures use deterministic CBOR. See [`canonical`].

pub mod canonical;
pub mod credential;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod knowledge;
pub mod payload;
pub mod types;
pub mod validation;

pub use credential::{Capability, Credential};
pub use crypto::{Blake3Hash, Keypair, PublicKey, Signature};
pub use entry::Entry;
pub use error::{CoreError, ValidationError};
pub use knowledge::{KnowledgeVector, LogRange};
pub use payload::{EntryPayload, FieldValue, Mutation, Op};
pub use types::{CredentialId, LogKey};
pub use validation::{validate_entry, EntryCheck};
