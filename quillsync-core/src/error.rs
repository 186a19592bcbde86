//! Error taxonomy for store and session operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors surfaced by document persistence and the operations built on it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The document id does not resolve.
    #[error("document not found")]
    NotFound,
    /// The document exists but the caller may not perform the operation.
    #[error("access denied")]
    AccessDenied,
    /// A compare-and-swap save lost the race: the persisted `updated_at` has
    /// advanced past the caller's baseline. Never auto-retried blindly.
    #[error("stale write: baseline {expected} is behind the server")]
    StaleWrite {
        /// The `updated_at` the caller based its save on.
        expected: DateTime<Utc>,
        /// The server's current `updated_at`, when known.
        current: Option<DateTime<Utc>>,
    },
    /// Retryable network or I/O failure.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),
    /// The request itself is malformed, e.g. an empty title.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Whether a retry with the same arguments could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientIo(_))
    }
}

/// Errors from the change-feed connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("feed protocol error: {0}")]
    Protocol(String),
    #[error("CBOR error: {0}")]
    Cbor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_io_is_transient() {
        assert!(StoreError::TransientIo("timeout".into()).is_transient());
        assert!(!StoreError::NotFound.is_transient());
        assert!(!StoreError::AccessDenied.is_transient());
        assert!(!StoreError::Invalid("empty title".into()).is_transient());
        let stale = StoreError::StaleWrite {
            expected: Utc::now(),
            current: None,
        };
        assert!(!stale.is_transient());
    }
}
