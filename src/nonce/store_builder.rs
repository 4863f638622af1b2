use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::nonce::cleanup::{BoxedCleanupStrategy, CustomCleanupStrategy, HybridCleanupStrategy};
use crate::nonce::time_utils::{self, TimeProviderFn};
use crate::nonce::{AuthConfig, NonceError, NonceStore};
use crate::storage::NonceStorage;

#[cfg(feature = "metrics")]
use crate::nonce::metrics::{MetricsCollector, NoOpMetricsCollector};

/// Default nonce lifetime.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(300);

/// A builder for creating a [`NonceStore`] instance.
#[must_use = "The builder does nothing unless `.build_and_init()` is called."]
pub struct NonceStoreBuilder {
    storage: Arc<dyn NonceStorage>,
    ttl: Option<Duration>,
    time_provider: Option<TimeProviderFn>,
    cleanup_strategy: Option<BoxedCleanupStrategy>,
    #[cfg(feature = "metrics")]
    metrics_collector: Option<Arc<dyn MetricsCollector>>,
}

impl NonceStoreBuilder {
    pub(crate) fn new(storage: Arc<dyn NonceStorage>) -> Self {
        Self {
            storage,
            ttl: None,
            time_provider: None,
            cleanup_strategy: None,
            #[cfg(feature = "metrics")]
            metrics_collector: None,
        }
    }

    /// Sets a custom time-to-live (TTL) for nonces.
    ///
    /// If not set, defaults to 5 minutes.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Applies the nonce settings of an [`AuthConfig`].
    pub fn with_config(self, config: &AuthConfig) -> Self {
        self.with_ttl(config.nonce_ttl)
    }

    /// Replaces the system clock. The closure returns Unix milliseconds.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use siwe_nonce_auth::nonce::NonceStore;
    /// # use siwe_nonce_auth::storage::MemoryStorage;
    /// # use std::sync::Arc;
    /// # async fn example() -> Result<(), siwe_nonce_auth::NonceError> {
    /// let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
    ///     .with_time_provider(|| Ok(1_700_000_000_000))
    ///     .build_and_init()
    ///     .await?;
    /// assert_eq!(store.issue().await?.issued_at, 1_700_000_000_000);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_time_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Result<i64, NonceError> + Send + Sync + 'static,
    {
        self.time_provider = Some(Arc::new(provider));
        self
    }

    /// Configures the automatic cleanup strategy with custom hybrid thresholds.
    ///
    /// By default the store sweeps after 100 consume attempts or 5 minutes,
    /// whichever comes first.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use std::time::Duration;
    /// # use std::sync::Arc;
    /// # use siwe_nonce_auth::nonce::NonceStore;
    /// # use siwe_nonce_auth::storage::MemoryStorage;
    /// #
    /// # async fn example() -> Result<(), siwe_nonce_auth::NonceError> {
    /// // Cleanup every 50 consumes or every 2 minutes
    /// let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
    ///     .with_hybrid_cleanup_thresholds(50, Duration::from_secs(120))
    ///     .build_and_init()
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_hybrid_cleanup_thresholds(
        mut self,
        count_threshold: u32,
        time_threshold: Duration,
    ) -> Self {
        let strategy = HybridCleanupStrategy::new(count_threshold, time_threshold);
        self.cleanup_strategy = Some(Box::new(strategy));
        self
    }

    /// Configures a custom cleanup strategy using a user-provided closure.
    ///
    /// The closure runs after every consume attempt and decides whether a
    /// background sweep should start.
    pub fn with_custom_cleanup_strategy<F, Fut>(mut self, strategy_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let strategy = CustomCleanupStrategy::new(strategy_fn);
        self.cleanup_strategy = Some(Box::new(strategy));
        self
    }

    /// Reports issue/consume/cleanup events to the given collector.
    #[cfg(feature = "metrics")]
    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    /// Builds the store and initializes its storage backend.
    ///
    /// Fails if the TTL is zero or the backend's `init()` fails.
    pub async fn build_and_init(self) -> Result<NonceStore, NonceError> {
        let ttl = self.ttl.unwrap_or(DEFAULT_NONCE_TTL);
        if ttl.is_zero() {
            return Err(NonceError::ConfigError(
                "nonce TTL must be greater than zero".to_string(),
            ));
        }

        let store = NonceStore {
            ttl,
            storage: self.storage,
            time_provider: self
                .time_provider
                .unwrap_or_else(time_utils::system_time_provider),
            cleanup_strategy: self
                .cleanup_strategy
                .unwrap_or_else(|| Box::new(HybridCleanupStrategy::default())),
            #[cfg(feature = "metrics")]
            metrics_collector: self
                .metrics_collector
                .unwrap_or_else(|| Arc::new(NoOpMetricsCollector::new())),
        };
        store.init().await?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_builder_defaults() {
        let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
            .build_and_init()
            .await
            .unwrap();
        assert_eq!(store.ttl(), DEFAULT_NONCE_TTL);
    }

    #[tokio::test]
    async fn test_builder_with_config() {
        let config = AuthConfig {
            nonce_ttl: Duration::from_secs(42),
            ..AuthConfig::from(crate::nonce::ConfigPreset::Production)
        };
        let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
            .with_config(&config)
            .build_and_init()
            .await
            .unwrap();
        assert_eq!(store.ttl(), Duration::from_secs(42));
    }

    #[tokio::test]
    async fn test_builder_rejects_zero_ttl() {
        let result = NonceStore::builder(Arc::new(MemoryStorage::new()))
            .with_ttl(Duration::ZERO)
            .build_and_init()
            .await;
        assert!(matches!(result, Err(NonceError::ConfigError(_))));
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_builder_with_metrics_collector() {
        use crate::nonce::InMemoryMetricsCollector;

        let collector = Arc::new(InMemoryMetricsCollector::new());
        let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
            .with_metrics_collector(collector.clone())
            .build_and_init()
            .await
            .unwrap();

        let nonce = store.issue().await.unwrap();
        store.consume(&nonce.value).await.unwrap();
        store.consume(&nonce.value).await.unwrap();

        let metrics = collector.get_metrics().await.unwrap();
        assert_eq!(metrics.nonces_issued, 1);
        assert_eq!(metrics.consume_outcomes.ok, 1);
        assert_eq!(metrics.consume_outcomes.already_used, 1);
    }
}
