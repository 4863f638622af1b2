use std::fmt::Display;

use thiserror::Error;

/// Error types that can occur while issuing, consuming, or sweeping nonces.
///
/// These are infrastructure failures. Whether a nonce was accepted is never
/// reported through this enum; that is the job of
/// [`ConsumeOutcome`](crate::nonce::ConsumeOutcome).
///
/// # Example
///
/// ```rust
/// use siwe_nonce_auth::nonce::{ConsumeOutcome, NonceError, NonceStore};
/// use siwe_nonce_auth::storage::MemoryStorage;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), NonceError> {
/// let store = NonceStore::builder(Arc::new(MemoryStorage::new()))
///     .build_and_init()
///     .await?;
///
/// match store.consume("never-issued-nonce").await {
///     Ok(ConsumeOutcome::Ok) => println!("nonce accepted"),
///     Ok(other) => println!("nonce rejected: {other}"),
///     Err(NonceError::StorageError(e)) => println!("backend unavailable: {e}"),
///     Err(e) => println!("other error: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum NonceError {
    /// A freshly generated nonce collided with a stored one.
    ///
    /// With 128 bits of entropy this only happens when the random source is
    /// broken, so the store surfaces it instead of retrying.
    #[error("Nonce already exists")]
    DuplicateNonce,

    /// The storage backend failed (connection, query, lock or format issue).
    #[error("Storage error: {0}")]
    StorageError(String),

    /// The system clock could not be read.
    #[error("Clock error: {0}")]
    ClockError(String),

    /// The operating system random source failed.
    #[error("Random source error: {0}")]
    RandomError(String),

    /// The store was configured with unusable settings.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl NonceError {
    /// Wraps a backend message into [`NonceError::StorageError`].
    pub fn from_storage_message(message: impl Into<String>) -> Self {
        Self::StorageError(message.into())
    }

    /// Wraps any displayable backend error into [`NonceError::StorageError`].
    pub fn from_storage_error<E: Display>(error: E) -> Self {
        Self::StorageError(error.to_string())
    }
}
