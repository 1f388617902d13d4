//! Error types and result aliases for bindery.
//!
//! This module defines the shared error types used across the bindery crates.
//! Errors are structured for programmatic handling and include context for
//! debugging. "Absent" outcomes that callers handle in the normal flow (a
//! missing object, an incomplete commit) are modeled as `Option`s or outcome
//! enums at the call sites, not as errors; the variants here describe faults.

use std::fmt;

/// The result type used throughout bindery.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bindery operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A path or key failed validation.
    #[error("validation error: {message}")]
    Validation {
        /// Description of the violated rule.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A requested object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The provided input was invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl Error {
    /// Creates a storage error with the given message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a storage error wrapping an underlying cause.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an internal error with the given message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a typed resource.
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound(format!("{resource_type}: {id}"))
    }

    /// Returns true when the error describes a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_displays_message() {
        let err = Error::storage("bucket unreachable");
        assert_eq!(err.to_string(), "storage error: bucket unreachable");
    }

    #[test]
    fn storage_error_carries_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::storage_with_source("write failed", io);
        let Error::Storage { source, .. } = &err else {
            panic!("expected storage variant");
        };
        assert!(source.is_some());
    }

    #[test]
    fn not_found_formats_resource_and_id() {
        let err = Error::not_found("job", "01H5");
        assert_eq!(err.to_string(), "not found: job: 01H5");
        assert!(err.is_not_found());
    }

    #[test]
    fn validation_error_displays_rule() {
        let err = Error::validation("segment contains '/'");
        assert_eq!(err.to_string(), "validation error: segment contains '/'");
        assert!(!err.is_not_found());
    }
}
