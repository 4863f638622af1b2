//! Time utilities for safe timestamp handling.
//!
//! Nonce timestamps are Unix milliseconds so that short TTLs behave
//! predictably in tests and in Redis `PX` expirations.

use crate::nonce::error::NonceError;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A function that provides the current time in Unix milliseconds.
pub type TimeProviderFn = Arc<dyn Fn() -> Result<i64, NonceError> + Send + Sync>;

/// Get current timestamp in milliseconds since Unix epoch.
///
/// In the extremely rare case where system time is before Unix epoch,
/// it returns an error instead of panicking.
pub(crate) fn current_timestamp_millis() -> Result<i64, NonceError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .map_err(|_| NonceError::ClockError("System time is before Unix epoch".to_string()))
}

/// The default time provider, backed by the system clock.
pub(crate) fn system_time_provider() -> TimeProviderFn {
    Arc::new(current_timestamp_millis)
}

/// Adds a duration to a millisecond timestamp without overflowing.
pub(crate) fn add_duration(timestamp_ms: i64, duration: Duration) -> i64 {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
    timestamp_ms.saturating_add(millis)
}

/// Check if an entry expiring at `expires_at` is expired at `now`.
///
/// The expiry instant itself already counts as expired.
pub(crate) fn is_expired(expires_at: i64, now: i64) -> bool {
    now >= expires_at
}
