//! Memory subsystem error types
//!
//! These are the failures surfaced to direct callers of the store, the
//! manager and the service facade. Injection and evaluation keep their own
//! internal error kinds and never return these to the conversation path.

use thiserror::Error;

/// Memory subsystem error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed memory record or search criteria
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown memory id
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// A record with the same id already exists
    #[error("Duplicate memory id: {0}")]
    DuplicateId(String),

    /// Storage failure or uninitialized access
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Text generation capability failed
    #[error("Generation error: {0}")]
    Generation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an error for an operation issued before `initialize()`.
    pub fn not_initialized() -> Self {
        Self::Store("not initialized".to_string())
    }

    /// Whether this error belongs to the storage class (I/O, parse,
    /// uninitialized access or duplicate id).
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::DuplicateId(_) | Self::Io(_) | Self::Serialization(_)
        )
    }
}

/// Result type alias for memory subsystem operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(Error::not_initialized().is_store_error());
        assert!(Error::DuplicateId("m-1".to_string()).is_store_error());
        assert!(Error::Io(std::io::Error::other("disk")).is_store_error());
        assert!(!Error::Validation("empty content".to_string()).is_store_error());
        assert!(!Error::NotFound("m-1".to_string()).is_store_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::not_initialized().to_string(), "Store error: not initialized");
        assert_eq!(
            Error::NotFound("abc".to_string()).to_string(),
            "Memory not found: abc"
        );
    }
}
