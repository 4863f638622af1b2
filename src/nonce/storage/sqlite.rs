//! SQLite storage backend implementation.
//!
//! This module provides a SQLite storage backend for nonce persistence.
//! The database file can be shared by several server processes on the same
//! host, and issued nonces survive restarts.

use super::{ConsumeOutcome, Nonce, NonceStorage, StorageStats};
use crate::NonceError;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// SQLite-based storage backend for nonce persistence.
///
/// # Features
///
/// - **Persistent storage**: Data survives application restarts
/// - **Atomic consume**: A single conditional `UPDATE` flips the consumed flag,
///   so concurrent processes sharing the file cannot both succeed
/// - **Automatic indexing**: Optimized queries for nonce lookup and cleanup
/// - **Thread-safe**: Uses `Arc<Mutex<Connection>>` for concurrent access
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::storage::SqliteStorage;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), siwe_nonce_auth::NonceError> {
/// // Create SQLite storage (file-based)
/// let storage = Arc::new(SqliteStorage::new("siwe_nonces.db")?);
///
/// // Or use in-memory SQLite (for testing)
/// let memory_storage = Arc::new(SqliteStorage::new(":memory:")?);
/// # Ok(())
/// # }
/// ```
pub struct SqliteStorage {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Create a new SQLite storage backend.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file, or ":memory:" for in-memory database
    pub fn new(db_path: &str) -> Result<Self, NonceError> {
        let connection = if db_path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(db_path)
        };

        let connection = connection.map_err(NonceError::from_storage_error)?;
        // Other processes may hold the write lock briefly
        connection
            .busy_timeout(Duration::from_secs(5))
            .map_err(NonceError::from_storage_error)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, NonceError> {
        self.connection
            .lock()
            .map_err(|_| NonceError::from_storage_message("SQLite connection lock poisoned"))
    }

    /// Create the database schema if it doesn't exist.
    fn init_schema(&self) -> Result<(), NonceError> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS siwe_nonce (
                nonce TEXT PRIMARY KEY NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                consumed INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )
        .map_err(NonceError::from_storage_error)?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_siwe_nonce_expires_at ON siwe_nonce (expires_at)",
            [],
        )
        .map_err(NonceError::from_storage_error)?;

        Ok(())
    }

    fn read_entry(conn: &Connection, value: &str) -> Result<Option<Nonce>, NonceError> {
        conn.query_row(
            "SELECT nonce, issued_at, expires_at, consumed FROM siwe_nonce WHERE nonce = ?1",
            params![value],
            |row| {
                Ok(Nonce {
                    value: row.get(0)?,
                    issued_at: row.get(1)?,
                    expires_at: row.get(2)?,
                    consumed: row.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()
        .map_err(NonceError::from_storage_error)
    }
}

#[async_trait]
impl NonceStorage for SqliteStorage {
    async fn init(&self) -> Result<(), NonceError> {
        self.init_schema()
    }

    async fn insert(&self, nonce: &Nonce) -> Result<(), NonceError> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO siwe_nonce (nonce, issued_at, expires_at, consumed) VALUES (?1, ?2, ?3, ?4)",
            params![
                nonce.value,
                nonce.issued_at,
                nonce.expires_at,
                nonce.consumed as i64
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(sqlite_err, _)
                if sqlite_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                NonceError::DuplicateNonce
            }
            _ => NonceError::from_storage_error(e),
        })?;

        Ok(())
    }

    async fn get(&self, value: &str) -> Result<Option<Nonce>, NonceError> {
        let conn = self.lock()?;
        Self::read_entry(&conn, value)
    }

    async fn consume(&self, value: &str, now: i64) -> Result<ConsumeOutcome, NonceError> {
        let conn = self.lock()?;

        let changed = conn
            .execute(
                "UPDATE siwe_nonce SET consumed = 1 WHERE nonce = ?1 AND consumed = 0 AND expires_at > ?2",
                params![value, now],
            )
            .map_err(NonceError::from_storage_error)?;

        if changed == 1 {
            return Ok(ConsumeOutcome::Ok);
        }

        // The update matched nothing; classify why
        match Self::read_entry(&conn, value)? {
            None => Ok(ConsumeOutcome::Unknown),
            Some(entry) if entry.consumed => Ok(ConsumeOutcome::AlreadyUsed),
            Some(_) => Ok(ConsumeOutcome::Expired),
        }
    }

    async fn cleanup_expired(&self, now: i64) -> Result<usize, NonceError> {
        let conn = self.lock()?;

        let changes = conn
            .execute(
                "DELETE FROM siwe_nonce WHERE expires_at <= ?1",
                params![now],
            )
            .map_err(NonceError::from_storage_error)?;

        Ok(changes)
    }

    async fn get_stats(&self) -> Result<StorageStats, NonceError> {
        let conn = self.lock()?;

        let count: usize = conn
            .query_row("SELECT COUNT(*) FROM siwe_nonce", [], |row| row.get(0))
            .map_err(NonceError::from_storage_error)?;

        let db_size: i64 = conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);

        let page_size: i64 = conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        let size_bytes = db_size * page_size;

        Ok(StorageStats {
            total_records: count,
            backend_info: format!("SQLite storage ({} bytes, {} pages)", size_bytes, db_size),
        })
    }
}
