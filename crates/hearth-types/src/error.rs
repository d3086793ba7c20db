//! Shared error types for the Hearth system.

use thiserror::Error;

/// Top-level error type for the Hearth system.
#[derive(Error, Debug)]
pub enum HearthError {
    /// A transient external failure (network, rate limit). Safe to retry.
    #[error("Transient external error: {0}")]
    Transient(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A record with this identifier already exists with different content.
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// Empty or malformed input that short-circuits to an empty result.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A storage backend error occurred.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An external call exceeded its deadline.
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// The service or queue is shutting down.
    #[error("Shutdown in progress")]
    ShuttingDown,

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HearthError {
    /// Whether this error class is worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, HearthError::Transient(_) | HearthError::Timeout(_))
    }
}

/// Alias for Result with HearthError.
pub type HearthResult<T> = Result<T, HearthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(HearthError::Transient("rate limited".into()).is_transient());
        assert!(HearthError::Timeout(15_000).is_transient());
        assert!(!HearthError::NotFound("doc".into()).is_transient());
        assert!(!HearthError::DuplicateIdentifier("mem".into()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = HearthError::DuplicateIdentifier("abc".into());
        assert_eq!(err.to_string(), "Duplicate identifier: abc");
        let err = HearthError::Timeout(500);
        assert_eq!(err.to_string(), "Timed out after 500ms");
    }
}
