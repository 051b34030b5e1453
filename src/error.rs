//! Error types for the observable map.

use crate::subscriptions::SubscriptionId;
use thiserror::Error;

/// Error returned by a subscriber callback.
///
/// Any `std::error::Error` converts into it, as do `&str` and `String`, so a
/// callback can write `Err("cache full".into())`.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for map operations.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A subscriber failed while an event was being delivered. The mutation
    /// that produced the event has already been applied.
    #[error("Subscriber {subscription} failed handling {kind} event: {source}")]
    SubscriberFailure {
        subscription: SubscriptionId,
        kind: String,
        #[source]
        source: SubscriberError,
    },

    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),
}

impl From<std::collections::TryReserveError> for MapError {
    fn from(e: std::collections::TryReserveError) -> Self {
        MapError::CapacityExhausted(e.to_string())
    }
}

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, MapError>;
