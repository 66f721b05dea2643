//! # Weft Sync
//!
//! Replication between two replicas over an ordered, reliable transport.
//!
//! ## Overview
//!
//! A [`ReplicationSession`] exchanges knowledge vectors with the peer,
//! requests the ranges it lacks, answers the peer's requests, and then keeps
//! tailing: entries that become durable locally are pushed until the session
//! closes. Every received entry goes through the log store's validation, so a
//! peer can never introduce an entry its writer did not sign.
//!
//! ## Key Properties
//!
//! - **Idempotent**: re-sending entries the peer holds is harmless
//! - **Resumable**: a new session only transfers what is still missing
//! - **Bounded**: in-flight requests and buffered bytes are capped
//! - **Isolating**: a bad entry aborts that log's stream, not the session
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft_sync::{MemoryTransport, ReplicationSession, SessionConfig};
//! # async fn example(store: Arc<weft_store::LogStore>, me: weft_core::PublicKey) -> weft_sync::Result<()> {
//! let (local, _remote) = MemoryTransport::pair(64);
//! let session = ReplicationSession::new(store, Arc::new(local), me, SessionConfig::default())?;
//! let handle = session.spawn();
//! handle.wait_caught_up().await?;
//! let report = handle.close().await?;
//! println!("received {} entries", report.entries_received);
//! # Ok(())
//! # }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Replica A                           Replica B
//!   |-------- Hello ------------------>|
//!   |<------- Hello -------------------|
//!   |-------- Request (log, 3..5) ---->|
//!   |<------- Request (log, 0..2) -----|
//!   |<------- Entries (done) ----------|
//!   |-------- Entries (done) --------->|
//!   |               ...                |
//!   |-------- Push ------------------->|   (tailing)
//!   |-------- Close ------------------>|
//! ```

pub mod codec;
pub mod config;
pub mod convergence;
pub mod error;
pub mod messages;
pub mod session;
pub mod transport;

pub use config::SessionConfig;
pub use convergence::{
    compare_knowledge, log_digest, state_digest, verify_convergence, ConvergenceResult,
};
pub use error::{Result, SyncError};
pub use messages::{limits, SyncErrorCode, SyncMessage, PROTOCOL_VERSION};
pub use session::{
    ReplicationSession, SessionHandle, SessionId, SessionReport, SessionState, SessionStatus,
};
pub use transport::{memory::MemoryTransport, Transport};
