//! Strategies that decide when a [`NonceStore`](crate::nonce::NonceStore)
//! sweeps expired nonces after a consume.
//!
//! Sweeping is housekeeping only: an expired nonce is rejected by `consume`
//! whether or not it has been evicted yet.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Strategy for determining when to perform automatic nonce cleanup.
#[async_trait]
pub trait CleanupStrategy: Send + Sync {
    /// Called after every consume attempt. Returns `true` when a sweep
    /// should be started.
    async fn should_cleanup(&self) -> bool;

    /// Marks that cleanup has been performed and resets internal state.
    async fn mark_as_cleaned(&self);
}

/// Sweeps after a number of consume attempts or once a time budget has
/// elapsed since the last sweep, whichever comes first.
pub struct HybridCleanupStrategy {
    count_threshold: u32,
    time_threshold: Duration,
    request_count: AtomicU32,
    origin: Instant,
    last_cleanup_ms: AtomicU64,
}

impl HybridCleanupStrategy {
    /// Creates a new hybrid cleanup strategy with the specified thresholds.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use siwe_nonce_auth::nonce::cleanup::HybridCleanupStrategy;
    ///
    /// // Sweep every 100 consumes or every 5 minutes
    /// let strategy = HybridCleanupStrategy::new(100, Duration::from_secs(300));
    /// assert_eq!(strategy.count_threshold(), 100);
    /// ```
    pub fn new(count_threshold: u32, time_threshold: Duration) -> Self {
        Self {
            count_threshold,
            time_threshold,
            request_count: AtomicU32::new(0),
            origin: Instant::now(),
            last_cleanup_ms: AtomicU64::new(0),
        }
    }

    pub fn count_threshold(&self) -> u32 {
        self.count_threshold
    }

    pub fn time_threshold(&self) -> Duration {
        self.time_threshold
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl CleanupStrategy for HybridCleanupStrategy {
    async fn should_cleanup(&self) -> bool {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.count_threshold {
            return true;
        }

        let since_last = self
            .elapsed_ms()
            .saturating_sub(self.last_cleanup_ms.load(Ordering::SeqCst));
        u128::from(since_last) >= self.time_threshold.as_millis()
    }

    async fn mark_as_cleaned(&self) {
        self.request_count.store(0, Ordering::SeqCst);
        self.last_cleanup_ms
            .store(self.elapsed_ms(), Ordering::SeqCst);
    }
}

impl Default for HybridCleanupStrategy {
    /// 100 consumes or 5 minutes.
    fn default() -> Self {
        Self::new(100, Duration::from_secs(300))
    }
}

/// Wrapper for custom cleanup strategies provided via closures.
///
/// State management is left to the closure; `mark_as_cleaned` does nothing.
pub struct CustomCleanupStrategy<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    strategy_fn: F,
}

impl<F, Fut> CustomCleanupStrategy<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    /// Creates a new custom cleanup strategy from a closure.
    ///
    /// # Example
    ///
    /// ```
    /// use siwe_nonce_auth::nonce::cleanup::CustomCleanupStrategy;
    ///
    /// // Never sweep inline; rely on the periodic sweeper instead
    /// let strategy = CustomCleanupStrategy::new(|| async { false });
    /// ```
    pub fn new(strategy_fn: F) -> Self {
        Self { strategy_fn }
    }
}

#[async_trait]
impl<F, Fut> CleanupStrategy for CustomCleanupStrategy<F, Fut>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn should_cleanup(&self) -> bool {
        (self.strategy_fn)().await
    }

    async fn mark_as_cleaned(&self) {}
}

/// Type alias for boxed cleanup strategies to reduce verbosity.
pub type BoxedCleanupStrategy = Box<dyn CleanupStrategy>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    async fn sweeps_in(strategy: &dyn CleanupStrategy, attempts: usize) -> Vec<bool> {
        let mut decisions = Vec::with_capacity(attempts);
        for _ in 0..attempts {
            decisions.push(strategy.should_cleanup().await);
        }
        decisions
    }

    #[tokio::test]
    async fn test_sweeps_on_every_nth_consume() {
        let strategy = HybridCleanupStrategy::new(3, Duration::from_secs(3600));
        strategy.mark_as_cleaned().await;

        assert_eq!(sweeps_in(&strategy, 3).await, [false, false, true]);
        strategy.mark_as_cleaned().await;
        assert_eq!(sweeps_in(&strategy, 3).await, [false, false, true]);
    }

    #[tokio::test]
    async fn test_sweeps_once_the_interval_has_passed() {
        let strategy = HybridCleanupStrategy::new(u32::MAX, Duration::from_millis(40));
        strategy.mark_as_cleaned().await;
        assert!(!strategy.should_cleanup().await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(strategy.should_cleanup().await);

        strategy.mark_as_cleaned().await;
        assert!(!strategy.should_cleanup().await);
    }

    #[test]
    fn test_default_thresholds() {
        let strategy = HybridCleanupStrategy::default();
        assert_eq!(strategy.count_threshold(), 100);
        assert_eq!(strategy.time_threshold(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_custom_strategy_follows_its_closure() {
        let sweep_requested = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&sweep_requested);
        let strategy = CustomCleanupStrategy::new(move || {
            let flag = Arc::clone(&flag);
            async move { flag.swap(false, Ordering::SeqCst) }
        });

        assert_eq!(sweeps_in(&strategy, 2).await, [false, false]);

        sweep_requested.store(true, Ordering::SeqCst);
        assert_eq!(sweeps_in(&strategy, 2).await, [true, false]);
    }

    #[tokio::test]
    async fn test_boxed_strategies_share_one_interface() {
        let strategies: Vec<BoxedCleanupStrategy> = vec![
            Box::new(HybridCleanupStrategy::new(1, Duration::from_secs(3600))),
            Box::new(CustomCleanupStrategy::new(|| async { true })),
        ];
        for strategy in &strategies {
            assert!(strategy.should_cleanup().await);
        }
    }
}
