//! Error types for the access control engine

use thiserror::Error;

/// Access control engine errors
#[derive(Debug, Error)]
pub enum AclError {
    /// Malformed or missing reference
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Optimistic version mismatch on an ability or grant row
    #[error("Conflict: '{resource}' changed since version {expected_version}")]
    Conflict {
        /// Canonical key of the contended row
        resource: String,
        /// Version the writer read before computing its update
        expected_version: u64,
    },

    /// Repository I/O failure
    #[error("Store failure: {0}")]
    StoreFailure(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AclError {
    /// True if the caller should re-read and retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Result type for access control operations
pub type Result<T> = std::result::Result<T, AclError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = AclError::Conflict {
            resource: "Article".to_string(),
            expected_version: 3,
        };

        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "Conflict: 'Article' changed since version 3"
        );
        assert!(!AclError::invalid("missing").is_conflict());
    }
}
