//! # Weft Testkit
//!
//! Testing utilities for Weft.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a [`Space`] with a genesis key and enrolled peers, plus
//!   helpers that replicate two peers until both have caught up
//! - **Generators**: Proptest strategies for entries, mutations and
//!   knowledge vectors
//! - **Golden vectors**: pinned entry encodings, with signatures checked
//!   against ed25519-dalek directly
//! - **Fault injection**: a transport that corrupts chosen entries in flight
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use weft_testkit::{sync_pair, Space};
//!
//! async fn example() -> weft::Result<()> {
//!     let mut space = Space::new(1);
//!     let alice = space.writer(1).await?;
//!     let bob = space.writer(2).await?;
//!
//!     alice.put("todo-1", "title", "buy milk").await?;
//!     sync_pair(&alice, &bob).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use weft_testkit::generators::log_entries;
//!
//! proptest! {
//!     #[test]
//!     fn entries_verify(entries in log_entries(8)) {
//!         for entry in entries {
//!             prop_assert!(entry.verify().is_ok());
//!         }
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod tampering;
pub mod vectors;

pub use fixtures::{device, signed_entries, sync_over, sync_pair, Space, TestPeer, WAIT};
pub use generators::{ScheduledWrite, WriteSchedule};
pub use tampering::TamperingTransport;
pub use vectors::{all_vectors, entry_from_vector, verify_all_vectors, GoldenVector};
