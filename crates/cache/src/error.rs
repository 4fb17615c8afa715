use std::time::Duration;

use thiserror::Error;

/// Errors returned by cache backends.
///
/// Callers treat every cache error as a miss; none of them should fail a
/// request on their own.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend rejected the operation or could not be reached.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Redis returned an error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A cached value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation did not finish within its deadline.
    #[error("Cache operation on {key} timed out after {after:?}")]
    Timeout { key: String, after: Duration },
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
