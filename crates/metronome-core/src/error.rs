//! Error types shared by every metronome crate.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TickerError>;

/// Configuration failures raised while resolving an interval.
///
/// These are never retried: the operation that triggered resolution (ticker
/// construction, `start`, or a scheduled tick) fails immediately.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TickerError {
    #[error("Invalid interval. Expecting positive non-zero number of milliseconds (got {value}).")]
    InvalidInterval { value: f64 },
}

impl TickerError {
    #[must_use]
    pub fn invalid_interval(value: f64) -> Self {
        Self::InvalidInterval { value }
    }
}

/// A subscriber panicked while a store was fanning out a value.
///
/// The panic is contained to the offending subscriber; the store hands this
/// error to its configured handler and keeps notifying the rest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subscriber panicked: {message}")]
pub struct SubscriberError {
    pub message: String,
}

impl SubscriberError {
    /// Build an error from a `catch_unwind` payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}
