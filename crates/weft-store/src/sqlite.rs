//! SQLite implementation of the Storage trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use weft_core::{Blake3Hash, LogKey, PublicKey};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::storage::{AppendResult, Storage};

/// SQLite-based storage.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Poisoned(format!("connection mutex: {}", e)))
}

fn stored_len(conn: &Connection, log_key: &LogKey) -> Result<u64> {
    let len: Option<i64> = conn
        .query_row(
            "SELECT len FROM logs WHERE log_key = ?1",
            params![log_key.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(len.unwrap_or(0) as u64)
}

fn row_to_key(bytes: Vec<u8>) -> Result<LogKey> {
    PublicKey::try_from(bytes.as_slice())
        .map_err(|_| StoreError::InvalidData(format!("log key of {} bytes", bytes.len())))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn append_durable(
        &self,
        log_key: &LogKey,
        index: u64,
        bytes: &[u8],
    ) -> Result<AppendResult> {
        let log_key = *log_key;
        let bytes = bytes.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let key = log_key.as_bytes().to_vec();
            let len = stored_len(&tx, &log_key)?;

            if index < len {
                let existing: Vec<u8> = tx.query_row(
                    "SELECT bytes FROM entries WHERE log_key = ?1 AND idx = ?2",
                    params![key, index as i64],
                    |row| row.get(0),
                )?;
                return Ok(if existing == bytes {
                    AppendResult::AlreadyExists
                } else {
                    AppendResult::Conflict
                });
            }
            if index > len {
                return Err(StoreError::OutOfOrder {
                    log_key,
                    expected: len,
                    got: index,
                });
            }

            let now = now_millis();
            let hash = Blake3Hash::hash(&bytes);
            tx.execute(
                "INSERT INTO entries (log_key, idx, bytes, entry_hash, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, index as i64, bytes, hash.as_bytes().as_slice(), now],
            )?;
            tx.execute(
                "INSERT INTO logs (log_key, len, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(log_key) DO UPDATE SET len = excluded.len, updated_at = excluded.updated_at",
                params![key, (index + 1) as i64, now],
            )?;
            tx.commit()?;

            Ok(AppendResult::Appended)
        })
        .await
    }

    async fn read_range(&self, log_key: &LogKey, from: u64, to: u64) -> Result<Vec<Bytes>> {
        let key = log_key.as_bytes().to_vec();
        if from >= to {
            return Ok(Vec::new());
        }

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT bytes FROM entries
                 WHERE log_key = ?1 AND idx >= ?2 AND idx < ?3
                 ORDER BY idx",
            )?;
            let rows = stmt.query_map(
                params![key, from as i64, to.min(i64::MAX as u64) as i64],
                |row| row.get::<_, Vec<u8>>(0),
            )?;

            let mut out = Vec::new();
            for row in rows {
                out.push(Bytes::from(row?));
            }
            Ok(out)
        })
        .await
    }

    async fn len(&self, log_key: &LogKey) -> Result<u64> {
        let log_key = *log_key;
        self.with_conn(move |conn| stored_len(conn, &log_key)).await
    }

    async fn register_log(&self, log_key: &LogKey) -> Result<()> {
        let key = log_key.as_bytes().to_vec();
        self.with_conn(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT OR IGNORE INTO logs (log_key, len, created_at, updated_at)
                 VALUES (?1, 0, ?2, ?2)",
                params![key, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_logs(&self) -> Result<Vec<LogKey>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT log_key FROM logs ORDER BY log_key")?;
            let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

            let mut keys = Vec::new();
            for row in rows {
                keys.push(row_to_key(row?)?);
            }
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> LogKey {
        PublicKey::from_bytes([b; 32])
    }

    #[tokio::test]
    async fn test_append_and_read() {
        let store = SqliteStorage::open_memory().unwrap();
        for i in 0..4u64 {
            let r = store
                .append_durable(&key(1), i, &[i as u8; 8])
                .await
                .unwrap();
            assert_eq!(r, AppendResult::Appended);
        }

        assert_eq!(store.len(&key(1)).await.unwrap(), 4);
        let range = store.read_range(&key(1), 1, 3).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].as_ref(), &[1u8; 8]);
        assert_eq!(range[1].as_ref(), &[2u8; 8]);
    }

    #[tokio::test]
    async fn test_duplicate_and_conflict() {
        let store = SqliteStorage::open_memory().unwrap();
        store.append_durable(&key(1), 0, b"a").await.unwrap();

        assert_eq!(
            store.append_durable(&key(1), 0, b"a").await.unwrap(),
            AppendResult::AlreadyExists
        );
        assert_eq!(
            store.append_durable(&key(1), 0, b"x").await.unwrap(),
            AppendResult::Conflict
        );
        assert_eq!(store.len(&key(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_gap_rejected() {
        let store = SqliteStorage::open_memory().unwrap();
        let err = store.append_durable(&key(1), 2, b"a").await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { expected: 0, got: 2, .. }));
    }

    #[tokio::test]
    async fn test_register_lists_empty_log() {
        let store = SqliteStorage::open_memory().unwrap();
        store.register_log(&key(7)).await.unwrap();
        store.register_log(&key(7)).await.unwrap();
        store.append_durable(&key(3), 0, b"a").await.unwrap();

        assert_eq!(store.list_logs().await.unwrap(), vec![key(3), key(7)]);
        assert_eq!(store.len(&key(7)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reopen_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.db");

        {
            let store = SqliteStorage::open(&path).unwrap();
            store.append_durable(&key(1), 0, b"first").await.unwrap();
            store.append_durable(&key(1), 1, b"second").await.unwrap();
        }

        let store = SqliteStorage::open(&path).unwrap();
        assert_eq!(store.len(&key(1)).await.unwrap(), 2);
        assert_eq!(store.list_logs().await.unwrap(), vec![key(1)]);
        let range = store.read_range(&key(1), 0, 2).await.unwrap();
        assert_eq!(range[1].as_ref(), b"second");
    }
}
