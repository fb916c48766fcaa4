//! Storage error types.

use thiserror::Error;

/// Errors that can occur in decision cache operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key is absent or expired.
    ///
    /// This is an expected outcome, not a failure: callers branch on it to
    /// decide between resolving fresh and propagating an error.
    #[error("cache miss")]
    CacheMiss,

    /// Error from the shared backend.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true for [`StorageError::CacheMiss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, StorageError::CacheMiss)
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
