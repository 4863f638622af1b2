// Core components
mod config;
mod error;
mod store;
mod store_builder;
pub(crate) mod time_utils;

// Storage and cleanup systems
pub mod cleanup;
pub mod storage;

// Metrics (optional feature)
#[cfg(feature = "metrics")]
pub mod metrics;

// Core components exports
pub use config::{AuthConfig, ConfigPreset};
pub use error::NonceError;
pub use store::{NONCE_BYTES, NonceStore};
pub use store_builder::{DEFAULT_NONCE_TTL, NonceStoreBuilder};
pub use time_utils::TimeProviderFn;

// Storage and cleanup exports
pub use cleanup::{
    BoxedCleanupStrategy, CleanupStrategy, CustomCleanupStrategy, HybridCleanupStrategy,
};
pub use storage::{ConsumeOutcome, MemoryStorage, Nonce, NonceStorage, StorageStats};

// Metrics exports (optional feature)
#[cfg(feature = "metrics")]
pub use metrics::{
    AuthMetrics, ConsumeMetrics, InMemoryMetricsCollector, MetricEvent, MetricsCollector,
    NoOpMetricsCollector,
};
