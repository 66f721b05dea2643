//! # Weft
//!
//! A local-first replicated database core: per-device signed logs,
//! replicated between peers and folded into a convergent document.
//!
//! ## Overview
//!
//! - **Logs**: each device appends signed entries to its own log. Nobody
//!   else can extend it, and every replica verifies what it stores.
//! - **Credentials**: a chain of signed grants rooted at the space's genesis
//!   key decides whose writes count.
//! - **Replication**: sessions exchange knowledge vectors and stream the
//!   missing ranges, then keep tailing new entries.
//! - **Materialization**: authorized mutations merge into a [`Document`] of
//!   last-writer-wins registers, identical on every replica that holds the
//!   same entries.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use weft::{Engine, Keypair, Op};
//! use weft::sync::MemoryTransport;
//!
//! async fn example() -> weft::Result<()> {
//!     let genesis = Keypair::generate();
//!     let alice = Engine::open_in_memory(genesis.clone(), genesis.public_key()).await?;
//!     let bob_key = Keypair::generate();
//!     let bob = Engine::open_in_memory(bob_key.clone(), genesis.public_key()).await?;
//!
//!     alice.grant(bob_key.public_key(), weft::Capability::Write).await?;
//!     alice.propose_mutation(vec![Op::put("todo-1", "title", "buy milk")]).await?;
//!
//!     let (a, b) = MemoryTransport::pair(64);
//!     alice.start_session(Arc::new(a))?;
//!     let session = bob.start_session(Arc::new(b))?;
//!     bob.wait_caught_up(session, Duration::from_secs(5)).await?;
//!
//!     bob.wait_until_applied(&alice.knowledge().await, Duration::from_secs(5)).await?;
//!     assert!(bob.state().get("todo-1", "title").is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `weft::core` - Entries, keys, credentials, knowledge vectors
//! - `weft::store` - Storage backends, logs and the log store
//! - `weft::sync` - Replication sessions and transports
//! - `weft::perms` - Key manager and credential admission

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod materializer;
pub mod subscription;

// Re-export component crates
pub use weft_core as core;
pub use weft_perms as perms;
pub use weft_store as store;
pub use weft_sync as sync;

pub use config::{EngineConfig, MaterializerConfig};
pub use document::{Document, FieldChange, Register, Stamp};
pub use engine::Engine;
pub use error::{EngineError, ErrorKind, Result};
pub use materializer::Materializer;
pub use subscription::{StateChange, Subscription, SubscriptionRegistry};

// Re-export commonly used core types
pub use weft_core::{
    Capability, Credential, Entry, FieldValue, Keypair, KnowledgeVector, LogKey, Mutation, Op,
    PublicKey,
};
pub use weft_sync::{SessionId, SessionReport, SessionState, SessionStatus};
