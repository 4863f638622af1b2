//! Redis storage backend implementation.
//!
//! This module provides a Redis-based storage backend for nonce persistence.
//! It's the backend of choice when several server instances sit behind a load
//! balancer: a nonce issued by one instance can be consumed by any other.

use super::{ConsumeOutcome, Nonce, NonceStorage, StorageStats};
use crate::NonceError;
use async_trait::async_trait;
use redis::{AsyncCommands, Client, Script, aio::MultiplexedConnection};
use std::sync::{Arc, LazyLock};
use tokio::sync::Mutex;

/// Check-and-set for a single nonce key.
///
/// Values are stored as `issued_at:expires_at:consumed`. `KEEPTTL` preserves
/// the expiry set at issue time so the tombstone disappears on schedule.
static CONSUME_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
local v = redis.call('GET', KEYS[1])
if not v then
  return 'unknown'
end
local issued, expires, consumed = string.match(v, '^(%-?%d+):(%-?%d+):([01])$')
if not expires then
  return redis.error_reply('malformed nonce record')
end
if consumed == '1' then
  return 'used'
end
if tonumber(ARGV[1]) >= tonumber(expires) then
  return 'expired'
end
redis.call('SET', KEYS[1], issued .. ':' .. expires .. ':1', 'KEEPTTL')
return 'ok'
"#,
    )
});

/// Redis-based storage backend for nonce persistence.
///
/// # Features
///
/// - **Distributed storage**: Shared state across multiple application instances
/// - **TTL support**: Keys expire on their own via `PX`, consumed or not
/// - **Atomic consume**: A server-side Lua script checks and flips the flag
/// - **Connection reuse**: Keeps one multiplexed connection alive
/// - **Production-safe**: Uses SCAN instead of KEYS
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::storage::RedisStorage;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), siwe_nonce_auth::NonceError> {
/// let storage = Arc::new(RedisStorage::new("redis://localhost:6379", "siwe_nonce")?);
/// # Ok(())
/// # }
/// ```
pub struct RedisStorage {
    client: Client,
    key_prefix: String,
    conn: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl RedisStorage {
    /// Create a new Redis storage backend.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `key_prefix` - Prefix for all nonce keys to avoid collisions
    pub fn new(redis_url: &str, key_prefix: &str) -> Result<Self, NonceError> {
        let client = Client::open(redis_url)
            .map_err(|e| NonceError::from_storage_message(format!("Redis client error: {}", e)))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.to_string(),
            conn: Arc::new(Mutex::new(None)),
        })
    }

    /// Get or create a persistent connection
    async fn get_connection(&self) -> Result<MultiplexedConnection, NonceError> {
        let mut conn_guard = self.conn.lock().await;

        if let Some(conn) = conn_guard.as_ref() {
            let mut test_conn = conn.clone();
            match redis::cmd("PING")
                .query_async::<_, String>(&mut test_conn)
                .await
            {
                Ok(_) => return Ok(conn.clone()),
                Err(_) => {
                    *conn_guard = None;
                }
            }
        }

        let new_conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| {
                NonceError::from_storage_message(format!("Redis connection failed: {}", e))
            })?;

        *conn_guard = Some(new_conn.clone());
        Ok(new_conn)
    }

    fn make_key(&self, value: &str) -> String {
        let mut key = String::with_capacity(self.key_prefix.len() + value.len() + 1);
        key.push_str(&self.key_prefix);
        key.push(':');
        key.push_str(value);
        key
    }

    fn encode_value(nonce: &Nonce) -> String {
        format!(
            "{}:{}:{}",
            nonce.issued_at,
            nonce.expires_at,
            if nonce.consumed { 1 } else { 0 }
        )
    }

    fn parse_entry(&self, key: &str, value: &str) -> Result<Nonce, NonceError> {
        let mut parts = value.split(':');
        let (Some(issued_at), Some(expires_at), Some(consumed), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(NonceError::from_storage_message(
                "Invalid Redis value format",
            ));
        };

        let issued_at: i64 = issued_at
            .parse()
            .map_err(|_| NonceError::from_storage_message("Invalid timestamp in Redis value"))?;
        let expires_at: i64 = expires_at
            .parse()
            .map_err(|_| NonceError::from_storage_message("Invalid timestamp in Redis value"))?;

        let value = key
            .strip_prefix(&self.key_prefix)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| NonceError::from_storage_message("Invalid Redis key format"))?;

        Ok(Nonce {
            value: value.to_string(),
            issued_at,
            expires_at,
            consumed: consumed == "1",
        })
    }

    /// Scan keys with pattern using SCAN instead of KEYS for production safety
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, NonceError> {
        let mut conn = self.get_connection().await?;
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(NonceError::from_storage_error)?;

            keys.extend(batch);
            cursor = new_cursor;

            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl NonceStorage for RedisStorage {
    async fn init(&self) -> Result<(), NonceError> {
        let mut conn = self.get_connection().await?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| NonceError::from_storage_message(format!("Redis ping failed: {}", e)))?;

        Ok(())
    }

    async fn insert(&self, nonce: &Nonce) -> Result<(), NonceError> {
        let mut conn = self.get_connection().await?;
        let key = self.make_key(&nonce.value);
        let value = Self::encode_value(nonce);
        // PX must be positive
        let ttl_ms = (nonce.expires_at - nonce.issued_at).max(1) as usize;

        let result: Result<Option<String>, _> = conn
            .set_options(
                &key,
                &value,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::PX(ttl_ms)),
            )
            .await;

        match result {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(NonceError::DuplicateNonce),
            Err(e) => Err(NonceError::from_storage_error(e)),
        }
    }

    async fn get(&self, value: &str) -> Result<Option<Nonce>, NonceError> {
        let mut conn = self.get_connection().await?;
        let key = self.make_key(value);

        let stored: Option<String> = conn
            .get(&key)
            .await
            .map_err(NonceError::from_storage_error)?;

        match stored {
            Some(val) => Ok(Some(self.parse_entry(&key, &val)?)),
            None => Ok(None),
        }
    }

    async fn consume(&self, value: &str, now: i64) -> Result<ConsumeOutcome, NonceError> {
        let mut conn = self.get_connection().await?;
        let key = self.make_key(value);

        let result: String = CONSUME_SCRIPT
            .key(&key)
            .arg(now)
            .invoke_async(&mut conn)
            .await
            .map_err(NonceError::from_storage_error)?;

        match result.as_str() {
            "ok" => Ok(ConsumeOutcome::Ok),
            "used" => Ok(ConsumeOutcome::AlreadyUsed),
            "expired" => Ok(ConsumeOutcome::Expired),
            "unknown" => Ok(ConsumeOutcome::Unknown),
            other => Err(NonceError::from_storage_message(format!(
                "Unexpected consume script reply: {}",
                other
            ))),
        }
    }

    async fn cleanup_expired(&self, now: i64) -> Result<usize, NonceError> {
        let mut conn = self.get_connection().await?;

        // Redis drops keys on its own once PX elapses; this catches the rest
        let pattern = format!("{}:*", self.key_prefix);
        let keys = self.scan_keys(&pattern).await?;

        let mut deleted_count = 0;
        let mut to_delete = Vec::new();

        for chunk in keys.chunks(100) {
            let values: Vec<Option<String>> = redis::cmd("MGET")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(NonceError::from_storage_error)?;

            for (key, value) in chunk.iter().zip(values.iter()) {
                let expired = value
                    .as_deref()
                    .and_then(|val| self.parse_entry(key, val).ok())
                    .is_some_and(|entry| entry.is_expired_at(now));
                if expired {
                    to_delete.push(key.clone());
                }
            }
        }

        for chunk in to_delete.chunks(100) {
            if !chunk.is_empty() {
                let deleted: usize = conn
                    .del(chunk)
                    .await
                    .map_err(NonceError::from_storage_error)?;
                deleted_count += deleted;
            }
        }

        Ok(deleted_count)
    }

    async fn get_stats(&self) -> Result<StorageStats, NonceError> {
        let mut conn = self.get_connection().await?;

        let pattern = format!("{}:*", self.key_prefix);
        let keys = self.scan_keys(&pattern).await?;
        let total_records = keys.len();

        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(NonceError::from_storage_error)?;

        let memory_usage = info
            .lines()
            .find_map(|line| line.strip_prefix("used_memory_human:"))
            .map(str::trim)
            .unwrap_or("unknown");

        Ok(StorageStats {
            total_records,
            backend_info: format!(
                "Redis storage (memory: {}, prefix: {})",
                memory_usage, self.key_prefix
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const PREFIX: &str = "test_siwe_nonce";

    // These tests need a running Redis instance and skip themselves otherwise
    async fn get_test_storage() -> Option<RedisStorage> {
        let storage = RedisStorage::new("redis://localhost:6379", PREFIX).ok()?;
        match storage.init().await {
            Ok(()) => {
                let _ = storage.cleanup_expired(i64::MAX).await;
                Some(storage)
            }
            Err(_) => {
                println!("Skipping Redis tests - no Redis server available");
                None
            }
        }
    }

    fn nonce(value: &str, expires_at: i64) -> Nonce {
        Nonce {
            value: value.to_string(),
            issued_at: 0,
            expires_at,
            consumed: false,
        }
    }

    #[test]
    fn test_parse_entry() {
        let storage = RedisStorage::new("redis://localhost:6379", PREFIX).unwrap();
        let entry = storage
            .parse_entry("test_siwe_nonce:abcdef0123", "100:400:1")
            .unwrap();
        assert_eq!(entry.value, "abcdef0123");
        assert_eq!(entry.issued_at, 100);
        assert_eq!(entry.expires_at, 400);
        assert!(entry.consumed);

        assert!(storage.parse_entry("test_siwe_nonce:x", "100:400").is_err());
        assert!(storage.parse_entry("other:x", "100:400:0").is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_redis_storage_basic_operations() {
        let Some(storage) = get_test_storage().await else {
            return;
        };

        storage
            .insert(&nonce("basic-nonce", 300_000))
            .await
            .unwrap();

        let entry = storage.get("basic-nonce").await.unwrap().unwrap();
        assert_eq!(entry, nonce("basic-nonce", 300_000));

        let result = storage.insert(&nonce("basic-nonce", 300_000)).await;
        assert!(matches!(result, Err(NonceError::DuplicateNonce)));

        let _ = storage.cleanup_expired(i64::MAX).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_redis_storage_consume_lifecycle() {
        let Some(storage) = get_test_storage().await else {
            return;
        };

        storage.insert(&nonce("live", 300_000)).await.unwrap();
        storage.insert(&nonce("stale", 300_000)).await.unwrap();

        assert_eq!(
            storage.consume("live", 1).await.unwrap(),
            ConsumeOutcome::Ok
        );
        assert_eq!(
            storage.consume("live", 2).await.unwrap(),
            ConsumeOutcome::AlreadyUsed
        );
        assert_eq!(
            storage.consume("stale", 300_000).await.unwrap(),
            ConsumeOutcome::Expired
        );
        assert_eq!(
            storage.consume("missing", 1).await.unwrap(),
            ConsumeOutcome::Unknown
        );

        let _ = storage.cleanup_expired(i64::MAX).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_redis_storage_ttl() {
        let Some(storage) = get_test_storage().await else {
            return;
        };

        storage.insert(&nonce("ttl-nonce", 100)).await.unwrap();
        assert!(storage.get("ttl-nonce").await.unwrap().is_some());

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(storage.get("ttl-nonce").await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_redis_storage_concurrent_consume() {
        let Some(storage) = get_test_storage().await else {
            return;
        };
        let storage = Arc::new(storage);
        storage.insert(&nonce("contended", 300_000)).await.unwrap();

        let mut handles = vec![];
        for _ in 0..16 {
            let storage_clone = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage_clone.consume("contended", 1).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let _ = storage.cleanup_expired(i64::MAX).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_redis_storage_stats() {
        let Some(storage) = get_test_storage().await else {
            return;
        };

        storage.insert(&nonce("stats-1", 300_000)).await.unwrap();
        storage.insert(&nonce("stats-2", 300_000)).await.unwrap();

        let stats = storage.get_stats().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert!(stats.backend_info.contains(PREFIX));

        let deleted = storage.cleanup_expired(i64::MAX).await.unwrap();
        assert_eq!(deleted, 2);
    }
}
