//! Messaging error types.

use thiserror::Error;

/// Errors that can occur while publishing or consuming events.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The bus could not be reached.
    #[error("Message bus connection failed: {0}")]
    Connection(String),

    /// The bus rejected a publish.
    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    /// A single subscription attempt failed.
    #[error("Subscribe to '{topic}' failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// Subscription setup gave up after exhausting its retry budget.
    #[error("Subscription to '{topic}' failed after {attempts} attempts: {last_error}")]
    SubscriptionFailed {
        topic: String,
        attempts: u32,
        last_error: String,
    },

    /// An event could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for messaging results.
pub type Result<T> = std::result::Result<T, MessagingError>;
