//! Monitoring and metrics collection for the sign-in flow.
//!
//! This module provides a pluggable metrics system for tracking nonce
//! issuance, consume outcomes, signature verification and sweeps. Metrics
//! collection is optional and can be enabled via the `metrics` feature.

use crate::NonceError;
use crate::nonce::ConsumeOutcome;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Snapshot of everything the collector has counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthMetrics {
    /// Total number of nonces issued
    pub nonces_issued: u64,
    /// Consume attempts, by outcome
    pub consume_outcomes: ConsumeMetrics,
    /// Total number of verification attempts
    pub verification_attempts: u64,
    /// Successful verifications, by signature scheme label
    pub verified_by_scheme: BTreeMap<&'static str, u64>,
    /// Failed verifications, by error code
    pub failures_by_code: BTreeMap<&'static str, u64>,
    /// Number of sweeps performed
    pub cleanup_operations: u64,
    /// Nonces evicted by all sweeps together
    pub items_cleaned: u64,
    /// Storage backend failures
    pub storage_errors: u64,
    /// Average verification latency (microseconds)
    pub avg_verification_time_us: u64,
}

/// Consume attempts broken down by [`ConsumeOutcome`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeMetrics {
    pub ok: u64,
    pub already_used: u64,
    pub expired: u64,
    pub unknown: u64,
}

/// Events that can be tracked by the metrics system.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    /// A nonce was issued
    NonceIssued {
        /// Time taken to generate and store it
        duration: Duration,
    },
    /// A nonce consume attempt completed
    NonceConsumed {
        /// What the storage backend reported
        outcome: ConsumeOutcome,
    },
    /// A sign-in attempt reached a terminal state
    VerificationAttempt {
        /// Time from request to verdict
        duration: Duration,
        /// Signature scheme on success
        scheme: Option<&'static str>,
        /// Stable error code on failure
        error_code: Option<&'static str>,
    },
    /// A sweep was performed
    CleanupOperation {
        /// Number of items cleaned up
        items_cleaned: usize,
        /// Time taken
        duration: Duration,
    },
    /// A storage operation failed
    StorageError {
        /// Which operation failed (issue, consume, cleanup)
        operation: &'static str,
    },
}

/// Trait for metrics collection backends.
///
/// All methods must be thread-safe as they may be called concurrently from
/// multiple request handlers.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Record a metric event.
    ///
    /// This method should be fast and non-blocking as it sits on the
    /// request path.
    async fn record_event(&self, event: MetricEvent);

    /// Get current metrics snapshot.
    async fn get_metrics(&self) -> Result<AuthMetrics, NonceError>;

    /// Reset all metrics to zero.
    async fn reset_metrics(&self) -> Result<(), NonceError>;
}

/// In-memory metrics collector backed by atomic counters.
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::nonce::{InMemoryMetricsCollector, MetricEvent, MetricsCollector};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), siwe_nonce_auth::NonceError> {
/// let collector = InMemoryMetricsCollector::new();
///
/// collector.record_event(MetricEvent::NonceIssued {
///     duration: Duration::from_micros(80),
/// }).await;
///
/// let metrics = collector.get_metrics().await?;
/// assert_eq!(metrics.nonces_issued, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    nonces_issued: AtomicU64,
    consume_ok: AtomicU64,
    consume_already_used: AtomicU64,
    consume_expired: AtomicU64,
    consume_unknown: AtomicU64,
    verification_attempts: AtomicU64,
    verification_time_total: AtomicU64,
    cleanup_operations: AtomicU64,
    items_cleaned: AtomicU64,
    storage_errors: AtomicU64,
    labels: Mutex<LabelCounts>,
}

#[derive(Debug, Default)]
struct LabelCounts {
    verified_by_scheme: BTreeMap<&'static str, u64>,
    failures_by_code: BTreeMap<&'static str, u64>,
}

impl InMemoryMetricsCollector {
    /// Create a new in-memory metrics collector.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsCollector for InMemoryMetricsCollector {
    async fn record_event(&self, event: MetricEvent) {
        match event {
            MetricEvent::NonceIssued { .. } => {
                self.nonces_issued.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::NonceConsumed { outcome } => {
                let counter = match outcome {
                    ConsumeOutcome::Ok => &self.consume_ok,
                    ConsumeOutcome::AlreadyUsed => &self.consume_already_used,
                    ConsumeOutcome::Expired => &self.consume_expired,
                    ConsumeOutcome::Unknown => &self.consume_unknown,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            MetricEvent::VerificationAttempt {
                duration,
                scheme,
                error_code,
            } => {
                self.verification_attempts.fetch_add(1, Ordering::Relaxed);
                self.verification_time_total.fetch_add(
                    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
                    Ordering::Relaxed,
                );

                let mut labels = self.labels.lock().await;
                if let Some(code) = error_code {
                    *labels.failures_by_code.entry(code).or_default() += 1;
                } else if let Some(scheme) = scheme {
                    *labels.verified_by_scheme.entry(scheme).or_default() += 1;
                }
            }
            MetricEvent::CleanupOperation { items_cleaned, .. } => {
                self.cleanup_operations.fetch_add(1, Ordering::Relaxed);
                self.items_cleaned
                    .fetch_add(items_cleaned as u64, Ordering::Relaxed);
            }
            MetricEvent::StorageError { .. } => {
                self.storage_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn get_metrics(&self) -> Result<AuthMetrics, NonceError> {
        let attempts = self.verification_attempts.load(Ordering::Relaxed);
        let labels = self.labels.lock().await;

        Ok(AuthMetrics {
            nonces_issued: self.nonces_issued.load(Ordering::Relaxed),
            consume_outcomes: ConsumeMetrics {
                ok: self.consume_ok.load(Ordering::Relaxed),
                already_used: self.consume_already_used.load(Ordering::Relaxed),
                expired: self.consume_expired.load(Ordering::Relaxed),
                unknown: self.consume_unknown.load(Ordering::Relaxed),
            },
            verification_attempts: attempts,
            verified_by_scheme: labels.verified_by_scheme.clone(),
            failures_by_code: labels.failures_by_code.clone(),
            cleanup_operations: self.cleanup_operations.load(Ordering::Relaxed),
            items_cleaned: self.items_cleaned.load(Ordering::Relaxed),
            storage_errors: self.storage_errors.load(Ordering::Relaxed),
            avg_verification_time_us: if attempts > 0 {
                self.verification_time_total.load(Ordering::Relaxed) / attempts
            } else {
                0
            },
        })
    }

    async fn reset_metrics(&self) -> Result<(), NonceError> {
        for counter in [
            &self.nonces_issued,
            &self.consume_ok,
            &self.consume_already_used,
            &self.consume_expired,
            &self.consume_unknown,
            &self.verification_attempts,
            &self.verification_time_total,
            &self.cleanup_operations,
            &self.items_cleaned,
            &self.storage_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.labels.lock().await = LabelCounts::default();
        Ok(())
    }
}

/// No-op metrics collector that discards all metrics.
#[derive(Debug, Default)]
pub struct NoOpMetricsCollector;

impl NoOpMetricsCollector {
    /// Create a new no-op metrics collector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsCollector for NoOpMetricsCollector {
    async fn record_event(&self, _event: MetricEvent) {}

    async fn get_metrics(&self) -> Result<AuthMetrics, NonceError> {
        Ok(AuthMetrics::default())
    }

    async fn reset_metrics(&self) -> Result<(), NonceError> {
        Ok(())
    }
}
