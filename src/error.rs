//! Error types for clubshelf
//!
//! This module defines the error type shared by the cache layer, the lending
//! state machine and the record store, together with the `Result` alias used
//! across the crate.

use thiserror::Error;

/// Main error type for lending and cache operations
#[derive(Error, Debug)]
pub enum ClubshelfError {
    /// Referenced entity does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// The state machine refused a transition
    #[error("Illegal transition for {entity} {id}: cannot {action} from {from}")]
    IllegalTransition {
        entity: &'static str,
        id: i64,
        from: String,
        action: &'static str,
    },

    /// Cache backend could not be reached
    #[error("Cache backend unavailable: {0}")]
    CacheBackendUnavailable(String),

    /// Some invalidation chunks failed; affected keys stay stale until TTL
    #[error("Invalidation partially failed: {failed} of {total} keys not deleted")]
    InvalidationPartialFailure { failed: usize, total: usize },

    /// A row read by a mutation changed before its commit; nothing was written
    #[error("{entity} {id} changed since it was read")]
    StaleRecord { entity: &'static str, id: i64 },

    /// Request rejected before touching the record store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Durable record store failure
    #[error("Record store error: {0}")]
    Store(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for clubshelf operations
pub type Result<T> = std::result::Result<T, ClubshelfError>;

impl ClubshelfError {
    /// True when the error is a state machine rejection
    pub fn is_illegal_transition(&self) -> bool {
        matches!(self, ClubshelfError::IllegalTransition { .. })
    }

    /// True when a commit lost a race with another writer
    pub fn is_stale_record(&self) -> bool {
        matches!(self, ClubshelfError::StaleRecord { .. })
    }
}

impl From<serde_json::Error> for ClubshelfError {
    fn from(e: serde_json::Error) -> Self {
        ClubshelfError::Serialization(e.to_string())
    }
}

impl From<String> for ClubshelfError {
    fn from(s: String) -> Self {
        ClubshelfError::Other(s)
    }
}

impl From<&str> for ClubshelfError {
    fn from(s: &str) -> Self {
        ClubshelfError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ClubshelfError::NotFound {
            entity: "book_copy",
            id: 42,
        };
        assert_eq!(error.to_string(), "book_copy 42 not found");

        let error = ClubshelfError::IllegalTransition {
            entity: "member_book_copy",
            id: 7,
            from: "borrowed".to_string(),
            action: "withdraw",
        };
        assert!(error.to_string().contains("cannot withdraw from borrowed"));
        assert!(error.is_illegal_transition());

        let error = ClubshelfError::StaleRecord {
            entity: "order_details",
            id: 10,
        };
        assert_eq!(error.to_string(), "order_details 10 changed since it was read");
        assert!(error.is_stale_record());
        assert!(!error.is_illegal_transition());

        let error = ClubshelfError::InvalidationPartialFailure { failed: 3, total: 10 };
        assert!(error.to_string().contains("3 of 10"));
    }

    #[test]
    fn test_error_conversion() {
        let error: ClubshelfError = "test error".into();
        assert!(matches!(error, ClubshelfError::Other(_)));

        let error: ClubshelfError = "test error".to_string().into();
        assert!(matches!(error, ClubshelfError::Other(_)));

        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let error: ClubshelfError = parse.unwrap_err().into();
        assert!(matches!(error, ClubshelfError::Serialization(_)));
    }
}
