//! Error types for the pipeline orchestration domain.
//!
//! Only faults live here. Outcomes a caller handles in the normal flow
//! (an incomplete commit, a part with no converter, a missing document)
//! are expressed as values by the modules that produce them.

/// The result type used throughout bindery-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A callback referenced a job that does not exist.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: String,
    },

    /// A job identifier did not match either known shape.
    #[error("malformed identifier '{identifier}': {reason}")]
    MalformedIdentifier {
        /// The identifier as received.
        identifier: String,
        /// What made it unparseable.
        reason: String,
    },

    /// An invalid status transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A query filter failed validation.
    #[error("invalid filter: {message}")]
    InvalidFilter {
        /// Description of what made the filter invalid.
        message: String,
    },

    /// Dispatch to a worker function or completion queue failed.
    #[error("dispatch failed: {message}")]
    Dispatch {
        /// Description of the dispatch failure.
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

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from bindery-core.
    #[error("core error: {0}")]
    Core(#[from] bindery_core::error::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new dispatch error.
    #[must_use]
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::Dispatch {
            message: message.into(),
        }
    }

    /// Creates a job-not-found error.
    #[must_use]
    pub fn job_not_found(job_id: impl ToString) -> Self {
        Self::JobNotFound {
            job_id: job_id.to_string(),
        }
    }

    /// Creates a malformed-identifier error.
    #[must_use]
    pub fn malformed_identifier(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}
