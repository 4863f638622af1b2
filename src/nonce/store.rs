use std::sync::{Arc, Weak};
#[cfg(feature = "metrics")]
use std::time::Instant;
use std::time::Duration;

use rand::RngCore;
use rand::rngs::OsRng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::cleanup::BoxedCleanupStrategy;
use super::store_builder::NonceStoreBuilder;
use super::time_utils::{self, TimeProviderFn};
use super::{ConsumeOutcome, Nonce, NonceError, NonceStorage};

#[cfg(feature = "metrics")]
use super::metrics::{MetricEvent, MetricsCollector};

/// Number of random bytes in a nonce. Hex encoding doubles the length.
pub const NONCE_BYTES: usize = 16;

/// Issues and consumes single-use nonces on top of a [`NonceStorage`] backend.
///
/// Every nonce lives for the configured TTL (5 minutes by default) and can be
/// consumed at most once. Expired entries are swept lazily after consumes,
/// according to the configured [`CleanupStrategy`](super::CleanupStrategy),
/// and optionally by a periodic task started with [`spawn_sweeper`](Self::spawn_sweeper).
///
/// To create an instance, use [`NonceStore::builder`].
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::nonce::{ConsumeOutcome, NonceStore};
/// use siwe_nonce_auth::storage::MemoryStorage;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), siwe_nonce_auth::NonceError> {
/// let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
///     .build_and_init()
///     .await?;
///
/// let nonce = store.issue().await?;
/// assert_eq!(store.consume(&nonce.value).await?, ConsumeOutcome::Ok);
/// assert_eq!(store.consume(&nonce.value).await?, ConsumeOutcome::AlreadyUsed);
/// # Ok(())
/// # }
/// ```
pub struct NonceStore {
    pub(crate) ttl: Duration,
    pub(crate) storage: Arc<dyn NonceStorage>,
    pub(crate) time_provider: TimeProviderFn,
    pub(crate) cleanup_strategy: BoxedCleanupStrategy,
    #[cfg(feature = "metrics")]
    pub(crate) metrics_collector: Arc<dyn MetricsCollector>,
}

impl NonceStore {
    /// Creates a new [`NonceStoreBuilder`] over the given storage backend.
    pub fn builder(storage: Arc<dyn NonceStorage>) -> NonceStoreBuilder {
        NonceStoreBuilder::new(storage)
    }

    /// Initializes the storage backend (e.g., creates database tables).
    pub(crate) async fn init(&self) -> Result<(), NonceError> {
        self.storage.init().await
    }

    /// Current time according to the store's clock, in Unix milliseconds.
    pub fn now_millis(&self) -> Result<i64, NonceError> {
        (self.time_provider)()
    }

    /// Generates and persists a fresh nonce.
    ///
    /// The value is 128 bits from the operating system CSPRNG, hex encoded.
    /// Uniqueness is left to the backend's insert-if-absent check; a collision
    /// surfaces as [`NonceError::DuplicateNonce`].
    pub async fn issue(&self) -> Result<Nonce, NonceError> {
        #[cfg(feature = "metrics")]
        let start_time = Instant::now();

        let value = generate_nonce_value()?;
        let issued_at = self.now_millis()?;
        let nonce = Nonce {
            value,
            issued_at,
            expires_at: time_utils::add_duration(issued_at, self.ttl),
            consumed: false,
        };

        let insert_result = self.storage.insert(&nonce).await;

        #[cfg(feature = "metrics")]
        match &insert_result {
            Ok(()) => {
                self.record(MetricEvent::NonceIssued {
                    duration: start_time.elapsed(),
                })
                .await
            }
            Err(_) => self.record(MetricEvent::StorageError { operation: "issue" }).await,
        }

        insert_result?;
        tracing::debug!(nonce = %nonce.value, expires_at = nonce.expires_at, "nonce issued");
        Ok(nonce)
    }

    /// Atomically consumes a nonce.
    ///
    /// Among any number of concurrent callers presenting the same value, at
    /// most one receives [`ConsumeOutcome::Ok`]. Every later attempt sees
    /// [`ConsumeOutcome::AlreadyUsed`] until the tombstone is swept.
    pub async fn consume(&self, value: &str) -> Result<ConsumeOutcome, NonceError> {
        let now = self.now_millis()?;
        let result = self.storage.consume(value, now).await;

        #[cfg(feature = "metrics")]
        match &result {
            Ok(outcome) => {
                self.record(MetricEvent::NonceConsumed { outcome: *outcome })
                    .await
            }
            Err(_) => {
                self.record(MetricEvent::StorageError {
                    operation: "consume",
                })
                .await
            }
        }

        let outcome = result?;
        tracing::debug!(nonce = %value, outcome = %outcome, "nonce consume attempt");

        self.maybe_trigger_cleanup().await;

        Ok(outcome)
    }

    /// Removes every nonce whose expiry is at or before the current time.
    pub async fn cleanup_expired(&self) -> Result<usize, NonceError> {
        let now = self.now_millis()?;
        self.storage.cleanup_expired(now).await
    }

    /// Starts a detached task that sweeps expired nonces every `interval`.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped. Abort the returned handle to stop it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                match store.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "periodic nonce sweep"),
                    Err(e) => tracing::warn!("Periodic nonce sweep failed: {}", e),
                }
            }
        })
    }

    /// Check cleanup strategy and trigger background cleanup if needed.
    async fn maybe_trigger_cleanup(&self) {
        if self.cleanup_strategy.should_cleanup().await {
            self.spawn_background_cleanup();
            self.cleanup_strategy.mark_as_cleaned().await;
        }
    }

    fn spawn_background_cleanup(&self) {
        let storage = Arc::clone(&self.storage);
        let time_provider = Arc::clone(&self.time_provider);

        #[cfg(feature = "metrics")]
        let metrics = Arc::clone(&self.metrics_collector);

        tokio::spawn(async move {
            #[cfg(feature = "metrics")]
            let cleanup_start_time = Instant::now();

            let cleanup_result = match time_provider() {
                Ok(now) => storage.cleanup_expired(now).await,
                Err(e) => Err(e),
            };

            #[cfg(feature = "metrics")]
            match &cleanup_result {
                Ok(items_cleaned) => {
                    metrics
                        .record_event(MetricEvent::CleanupOperation {
                            items_cleaned: *items_cleaned,
                            duration: cleanup_start_time.elapsed(),
                        })
                        .await
                }
                Err(_) => {
                    metrics
                        .record_event(MetricEvent::StorageError {
                            operation: "cleanup",
                        })
                        .await
                }
            }

            match cleanup_result {
                Ok(removed) => tracing::trace!(removed, "background nonce cleanup"),
                Err(e) => tracing::warn!("Background cleanup failed: {}", e),
            }
        });
    }

    #[cfg(feature = "metrics")]
    async fn record(&self, event: MetricEvent) {
        self.metrics_collector.record_event(event).await;
    }

    /// Returns the configured nonce lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a reference to the storage backend.
    pub fn storage(&self) -> &Arc<dyn NonceStorage> {
        &self.storage
    }

    /// Returns the metrics collector the store reports to.
    #[cfg(feature = "metrics")]
    pub fn metrics_collector(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics_collector
    }
}

/// 16 bytes from the OS CSPRNG, lowercase hex.
fn generate_nonce_value() -> Result<String, NonceError> {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| NonceError::RandomError(e.to_string()))?;
    Ok(hex::encode(bytes))
}
