//! Pluggable storage backends for nonce persistence.
//!
//! This module provides a trait-based storage system that allows different
//! backends to be used for nonce persistence. The available backends depend
//! on the enabled features.
//!
//! Only a backend shared by every server instance keeps the protocol correct
//! in a replicated deployment: a nonce issued by one instance must be
//! consumable by any other. [`MemoryStorage`] is therefore limited to tests
//! and single-process setups.

use crate::NonceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// Always available
mod memory;
pub use memory::MemoryStorage;

// Feature-gated storage backends
#[cfg(feature = "sqlite-storage")]
mod sqlite;
#[cfg(feature = "sqlite-storage")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "redis-storage")]
mod redis;
#[cfg(feature = "redis-storage")]
pub use redis::RedisStorage;

/// A single-use nonce together with its lifecycle metadata.
///
/// Timestamps are Unix milliseconds. `consumed` flips from `false` to `true`
/// exactly once; consumed entries stay in storage as tombstones until
/// `expires_at` so that a replay is reported as [`ConsumeOutcome::AlreadyUsed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce {
    /// The opaque token, lowercase hex.
    pub value: String,
    /// When the nonce was issued.
    pub issued_at: i64,
    /// First instant at which the nonce is no longer accepted.
    pub expires_at: i64,
    /// Whether the nonce has already been consumed.
    pub consumed: bool,
}

impl Nonce {
    /// Returns `true` if the nonce is past its expiry at `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        crate::nonce::time_utils::is_expired(self.expires_at, now)
    }

    /// Classifies a consume attempt at `now` without mutating the entry.
    ///
    /// Backends use this for the read side of their check-and-set.
    pub fn outcome_at(&self, now: i64) -> ConsumeOutcome {
        if self.consumed {
            ConsumeOutcome::AlreadyUsed
        } else if self.is_expired_at(now) {
            ConsumeOutcome::Expired
        } else {
            ConsumeOutcome::Ok
        }
    }
}

/// Result of an attempt to consume a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumeOutcome {
    /// The nonce was live and is now consumed. At most one caller sees this.
    Ok,
    /// The nonce had already been consumed.
    AlreadyUsed,
    /// The nonce was issued but its TTL has elapsed.
    Expired,
    /// The nonce was never issued, or has already been evicted.
    Unknown,
}

impl ConsumeOutcome {
    /// Returns `true` only for [`ConsumeOutcome::Ok`].
    pub fn is_ok(self) -> bool {
        matches!(self, ConsumeOutcome::Ok)
    }

    /// Stable lowercase label, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ConsumeOutcome::Ok => "ok",
            ConsumeOutcome::AlreadyUsed => "already_used",
            ConsumeOutcome::Expired => "expired",
            ConsumeOutcome::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ConsumeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics about the nonce storage backend.
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Total number of nonce records in storage
    pub total_records: usize,
    /// Additional backend-specific information
    pub backend_info: String,
}

/// Abstract storage backend for nonce persistence.
///
/// This trait defines the interface that all storage backends must implement
/// to work with [`NonceStore`](crate::nonce::NonceStore).
///
/// # Available Implementations
///
/// - [`MemoryStorage`] - Always available, in-memory HashMap-based storage
/// - `SqliteStorage` - Available with `sqlite-storage` feature, persistent SQLite storage
/// - `RedisStorage` - Available with `redis-storage` feature, distributed Redis storage
///
/// # Atomicity
///
/// [`consume`](NonceStorage::consume) is the only synchronization point of the
/// whole protocol. It must check existence, expiry and the consumed flag and
/// set the flag in one atomic step, so that among any number of concurrent
/// callers presenting the same value at most one observes
/// [`ConsumeOutcome::Ok`].
///
/// # Error Handling
///
/// All methods return `Result<T, NonceError>` and should map backend-specific
/// errors to [`NonceError::StorageError`].
#[async_trait]
pub trait NonceStorage: Send + Sync {
    /// Optional method for storage backend initialization.
    ///
    /// Implementations can use this for tasks like schema creation or a
    /// connectivity check.
    async fn init(&self) -> Result<(), NonceError> {
        Ok(())
    }

    /// Stores a freshly issued nonce.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the nonce was stored
    /// * `Err(NonceError::DuplicateNonce)` - If the value is already present
    /// * `Err(NonceError)` - If there was an error accessing storage
    async fn insert(&self, nonce: &Nonce) -> Result<(), NonceError>;

    /// Retrieves a nonce entry if it is still stored.
    ///
    /// Expired entries may or may not be returned depending on whether they
    /// have been swept yet.
    async fn get(&self, value: &str) -> Result<Option<Nonce>, NonceError>;

    /// Atomically consumes a nonce at time `now` (Unix milliseconds).
    async fn consume(&self, value: &str, now: i64) -> Result<ConsumeOutcome, NonceError>;

    /// Removes every entry whose `expires_at` is at or before `now`.
    ///
    /// # Returns
    ///
    /// * `Ok(count)` - Number of entries that were removed
    /// * `Err(NonceError)` - If there was an error accessing storage
    async fn cleanup_expired(&self, now: i64) -> Result<usize, NonceError>;

    /// Returns statistics about the storage backend.
    async fn get_stats(&self) -> Result<StorageStats, NonceError>;
}
