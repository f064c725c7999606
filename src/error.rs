//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// The enum is `Clone` so a single fetch outcome can be handed to every
/// caller waiting on the same key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Key is empty or longer than the configured maximum
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialized value exceeds the configured payload limit
    #[error("Payload of {size} bytes exceeds maximum of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Per-call entry options or tags are malformed
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Global configuration is malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Stored payload could not be decoded
    #[error("Corrupt payload: {0}")]
    Corrupt(String),

    /// Value could not be converted to its serialized form
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The caller-supplied factory failed
    #[error("Factory failed: {0}")]
    Factory(Arc<anyhow::Error>),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Distributed tier could not be reached
    #[error("Distributed tier unavailable: {0}")]
    TierUnavailable(String),

    /// Tag removal completed locally but not on the distributed tier
    #[error("Tag '{tag}' only partially removed; {} key(s) unconfirmed", .keys.len())]
    TagIndexInconsistency { tag: String, keys: Vec<String> },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true for errors raised before any store was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey(_)
                | CacheError::PayloadTooLarge { .. }
                | CacheError::InvalidOptions(_)
                | CacheError::InvalidConfig(_)
        )
    }

    /// Returns true if the caller's own token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }

    /// Returns the factory error if this outcome came from a failed factory.
    pub fn factory_error(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::Factory(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_kinds() {
        assert!(CacheError::InvalidKey("".into()).is_validation());
        assert!(CacheError::PayloadTooLarge { size: 2, limit: 1 }.is_validation());
        assert!(!CacheError::Cancelled.is_validation());
        assert!(!CacheError::TierUnavailable("down".into()).is_validation());
    }

    #[test]
    fn test_factory_error_is_shared_verbatim() {
        let err = CacheError::Factory(Arc::new(anyhow::anyhow!("backend exploded")));
        let copy = err.clone();

        assert_eq!(
            copy.factory_error().map(|e| e.to_string()),
            Some("backend exploded".to_string())
        );
        assert!(err.to_string().contains("backend exploded"));
    }

    #[test]
    fn test_inconsistency_message_counts_keys() {
        let err = CacheError::TagIndexInconsistency {
            tag: "t".into(),
            keys: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Tag 't' only partially removed; 2 key(s) unconfirmed");
    }
}
