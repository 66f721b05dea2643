//! # Weft Store
//!
//! Durable, append-only logs for Weft.
//!
//! ## Overview
//!
//! Persistence is abstracted behind the [`Storage`] trait, with
//! [`SqliteStorage`] as the primary backend and [`MemoryStorage`] for tests.
//! On top of it, a [`Log`] signs or verifies entries and writes them durably
//! in index order, and the [`LogStore`] owns every log a replica knows.
//!
//! ## Key Types
//!
//! - [`Storage`] - The async trait for durable append and range reads
//! - [`Log`] - One writer's append-only log
//! - [`LogStore`] - All logs, plus a broadcast of durably stored entries
//! - [`DurableEvent`] - Emitted once an entry is durable
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft_core::Keypair;
//! use weft_store::{LogStore, LogStoreConfig, SqliteStorage};
//!
//! async fn example() {
//!     let storage = Arc::new(SqliteStorage::open("weft.db").unwrap());
//!     let store = LogStore::open(storage, LogStoreConfig::default()).await.unwrap();
//!
//!     let device = Keypair::generate();
//!     let log = store.create(device).await.unwrap();
//!     let index = log.append(&b"hello"[..]).await.unwrap();
//!     assert_eq!(index, 0);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Write-ahead**: an index is acknowledged and announced only after it
//!   is durable
//! - **Dense logs**: ingest accepts exactly the next index, rejects gaps,
//!   and drops duplicates by index
//! - **Atomic appends**: a log is never observed with a torn entry

pub mod error;
pub mod log;
pub mod log_store;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod storage;

pub use error::{LogError, Result, StoreError};
pub use log::{DurableEvent, IngestOutcome, Log};
pub use log_store::{LogStore, LogStoreConfig};
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use storage::{AppendResult, Storage};
