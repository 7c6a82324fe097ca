//! Error types for the tablesync client.
//!
//! One crate-level enum covers the whole taxonomy. Variants differ in how
//! they propagate:
//!
//! - [`SyncError::Schema`] is fatal to `connect()` — the cache cannot key
//!   rows without usable schema metadata.
//! - [`SyncError::Decode`] is non-fatal: malformed event messages are logged
//!   and skipped without closing the connection.
//! - [`SyncError::Connection`] triggers reconnection with backoff; it only
//!   becomes fatal once the configured attempt ceiling is exhausted.
//! - [`SyncError::Mutation`] is strictly request-scoped: it reaches the
//!   caller awaiting the rejected batch and nothing else.
//! - [`SyncError::Cancelled`] resolves requests that were still outstanding
//!   when the client stopped.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// All errors produced by the tablesync client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid client configuration (missing base URL, bad override URL, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unusable or missing schema metadata. Fatal to `connect()`.
    #[error("schema error: {0}")]
    Schema(String),

    /// A message or row could not be decoded. Logged and skipped.
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport failure (HTTP or WebSocket).
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation exceeded its configured deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The remote API rejected a mutation batch. The whole batch is void.
    #[error("mutation rejected (status {status}): {message}")]
    Mutation {
        /// HTTP status code returned by the remote API.
        status: u16,
        /// Human-readable rejection message.
        message: String,
        /// Structured error detail, when the server provided one.
        detail: Option<serde_json::Value>,
    },

    /// The client was stopped while the request was outstanding.
    #[error("cancelled: client stopped while the request was outstanding")]
    Cancelled,
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout(e.to_string())
        } else {
            SyncError::Connection(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

impl SyncError {
    /// Returns true when the error is transient and retrying may help.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_error_display() {
        let err = SyncError::Mutation {
            status: 409,
            message: "duplicate key".to_string(),
            detail: None,
        };
        let text = err.to_string();
        assert!(text.contains("409"));
        assert!(text.contains("duplicate key"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(SyncError::Connection("reset".into()).is_retriable());
        assert!(SyncError::Timeout("deadline".into()).is_retriable());
        assert!(!SyncError::Schema("no tables".into()).is_retriable());
        assert!(!SyncError::Cancelled.is_retriable());
    }
}
