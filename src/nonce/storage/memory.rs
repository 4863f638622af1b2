//! In-memory storage backend implementation.
//!
//! This module provides a simple in-memory storage backend that uses a HashMap
//! for nonce persistence. It's ideal for testing, development, and single-instance
//! applications where persistence across restarts is not required.

use super::{ConsumeOutcome, Nonce, NonceStorage, StorageStats};
use crate::NonceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A simple in-memory storage implementation for testing and single-instance applications.
///
/// This implementation uses a `HashMap` wrapped in `Arc<RwLock<>>` for
/// thread-safe access. It doesn't persist data across restarts and doesn't
/// implement automatic expiration (expired entries are only removed during
/// cleanup operations).
///
/// Nonces issued by one process are invisible to every other process, so a
/// replicated deployment must use a shared backend instead.
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::storage::{ConsumeOutcome, MemoryStorage, Nonce, NonceStorage};
///
/// # async fn example() -> Result<(), siwe_nonce_auth::NonceError> {
/// let storage = MemoryStorage::new();
/// let nonce = Nonce {
///     value: "8f2c0e6a9b1d4c3e".to_string(),
///     issued_at: 0,
///     expires_at: i64::MAX,
///     consumed: false,
/// };
/// storage.insert(&nonce).await?;
///
/// assert_eq!(storage.consume(&nonce.value, 1).await?, ConsumeOutcome::Ok);
/// assert_eq!(storage.consume(&nonce.value, 2).await?, ConsumeOutcome::AlreadyUsed);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, Nonce>>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new instance with room for `capacity` nonces.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::with_capacity(capacity))),
        }
    }
}

#[async_trait]
impl NonceStorage for MemoryStorage {
    async fn insert(&self, nonce: &Nonce) -> Result<(), NonceError> {
        let mut data = self.data.write().await;
        if data.contains_key(&nonce.value) {
            return Err(NonceError::DuplicateNonce);
        }
        data.insert(nonce.value.clone(), nonce.clone());
        Ok(())
    }

    async fn get(&self, value: &str) -> Result<Option<Nonce>, NonceError> {
        let data = self.data.read().await;
        Ok(data.get(value).cloned())
    }

    async fn consume(&self, value: &str, now: i64) -> Result<ConsumeOutcome, NonceError> {
        // Check and set under one write guard
        let mut data = self.data.write().await;
        let Some(entry) = data.get_mut(value) else {
            return Ok(ConsumeOutcome::Unknown);
        };

        let outcome = entry.outcome_at(now);
        if outcome.is_ok() {
            entry.consumed = true;
        }
        Ok(outcome)
    }

    async fn cleanup_expired(&self, now: i64) -> Result<usize, NonceError> {
        let mut data = self.data.write().await;
        let initial_count = data.len();
        data.retain(|_, entry| !entry.is_expired_at(now));
        Ok(initial_count - data.len())
    }

    async fn get_stats(&self) -> Result<StorageStats, NonceError> {
        let data = self.data.read().await;
        let consumed = data.values().filter(|entry| entry.consumed).count();
        let memory_usage = data.len() * std::mem::size_of::<Nonce>();
        Ok(StorageStats {
            total_records: data.len(),
            backend_info: format!(
                "In-memory HashMap storage ({} consumed, ~{} bytes)",
                consumed, memory_usage
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce(value: &str, issued_at: i64, expires_at: i64) -> Nonce {
        Nonce {
            value: value.to_string(),
            issued_at,
            expires_at,
            consumed: false,
        }
    }

    #[tokio::test]
    async fn test_memory_storage_basic_operations() -> Result<(), NonceError> {
        let storage = MemoryStorage::new();

        storage.insert(&nonce("test-nonce", 0, 10_000)).await?;

        let entry = storage.get("test-nonce").await?;
        assert!(entry.is_some());
        let entry = entry.unwrap();
        assert_eq!(entry.value, "test-nonce");
        assert!(!entry.consumed);

        assert!(storage.get("missing").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_duplicate_nonce() -> Result<(), NonceError> {
        let storage = MemoryStorage::new();

        storage.insert(&nonce("test-nonce", 0, 10_000)).await?;

        let result = storage.insert(&nonce("test-nonce", 5, 10_005)).await;
        assert!(matches!(result, Err(NonceError::DuplicateNonce)));

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_consume_lifecycle() -> Result<(), NonceError> {
        let storage = MemoryStorage::new();
        storage.insert(&nonce("live", 0, 10_000)).await?;
        storage.insert(&nonce("stale", 0, 10_000)).await?;

        assert_eq!(storage.consume("live", 9_999).await?, ConsumeOutcome::Ok);
        assert_eq!(
            storage.consume("live", 9_999).await?,
            ConsumeOutcome::AlreadyUsed
        );
        assert_eq!(
            storage.consume("stale", 10_000).await?,
            ConsumeOutcome::Expired
        );
        assert_eq!(
            storage.consume("never-issued", 0).await?,
            ConsumeOutcome::Unknown
        );

        // An expired nonce stays unusable on retry
        assert_eq!(
            storage.consume("stale", 10_001).await?,
            ConsumeOutcome::Expired
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_cleanup() -> Result<(), NonceError> {
        let storage = MemoryStorage::new();

        storage.insert(&nonce("old-nonce", 0, 1_000)).await?;
        storage.insert(&nonce("new-nonce", 0, 5_000)).await?;
        storage.consume("old-nonce", 500).await?;

        let removed = storage.cleanup_expired(1_000).await?;
        assert_eq!(removed, 1);

        assert!(storage.get("old-nonce").await?.is_none());
        assert!(storage.get("new-nonce").await?.is_some());

        // Evicted nonces are indistinguishable from never-issued ones
        assert_eq!(
            storage.consume("old-nonce", 1_500).await?,
            ConsumeOutcome::Unknown
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_stats() -> Result<(), NonceError> {
        let storage = MemoryStorage::new();

        let stats = storage.get_stats().await?;
        assert_eq!(stats.total_records, 0);
        assert!(stats.backend_info.contains("In-memory"));

        storage.insert(&nonce("nonce1", 0, 10_000)).await?;
        storage.insert(&nonce("nonce2", 0, 10_000)).await?;
        storage.consume("nonce1", 1).await?;

        let stats = storage.get_stats().await?;
        assert_eq!(stats.total_records, 2);
        assert!(stats.backend_info.contains("1 consumed"));
        assert!(stats.backend_info.contains("bytes"));

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_storage_concurrent_consume() -> Result<(), NonceError> {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert(&nonce("contended", 0, i64::MAX)).await?;

        let mut handles = vec![];
        for _ in 0..32 {
            let storage_clone = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage_clone.consume("contended", 1).await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap()?.is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        Ok(())
    }
}
