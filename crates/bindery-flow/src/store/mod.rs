//! Pluggable storage for job rows.
//!
//! The [`JobStore`] trait is the persistence layer for [`Job`] rows.
//!
//! ## Design Principles
//!
//! - **Whole-row writes**: `save` replaces the entire row; the last writer
//!   wins. There is no compare-and-swap, so callers must keep each row
//!   single-writer per phase (the splitter before dispatch, the callback
//!   handler after).
//! - **Queries are best-effort**: filters serve callback lookup and
//!   dashboards, not coordination. Completion is decided by artifact-store
//!   flags, never by querying rows.
//! - **Testability**: in-memory implementation for tests, a database-backed
//!   one for production deployments.

pub mod memory;

pub use memory::MemoryJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bindery_core::JobId;

use crate::error::{Error, Result};
use crate::job::{Job, JobStatus};

/// One predicate of a job query.
#[derive(Debug, Clone, PartialEq)]
pub enum JobFilter {
    /// Rows with exactly this status.
    StatusEquals(JobStatus),
    /// Rows whose composite identifier string equals this value.
    IdentifierEquals(String),
    /// Rows whose converter module is one of these names.
    ConvertModuleIn(Vec<String>),
    /// Rows created strictly after this instant.
    CreatedAfter(DateTime<Utc>),
}

impl JobFilter {
    /// Checks the filter is well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFilter`] for an empty module list, which
    /// would silently match nothing.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ConvertModuleIn(modules) if modules.is_empty() => Err(Error::InvalidFilter {
                message: "convert module list is empty".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Returns true when `job` satisfies this predicate.
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            Self::StatusEquals(status) => job.status == *status,
            Self::IdentifierEquals(identifier) => job.identifier.to_string() == *identifier,
            Self::ConvertModuleIn(modules) => job
                .convert_module
                .as_ref()
                .is_some_and(|m| modules.iter().any(|candidate| candidate == m)),
            Self::CreatedAfter(cutoff) => job.created_at > *cutoff,
        }
    }
}

/// A conjunction of filters with ordering and a row cap.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    /// Predicates, all of which must match.
    pub filters: Vec<JobFilter>,
    /// Maximum rows to return.
    pub limit: Option<usize>,
    /// Sort newest-created first instead of oldest first.
    pub newest_first: bool,
}

impl JobQuery {
    /// Creates an empty query matching every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a status predicate.
    #[must_use]
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.filters.push(JobFilter::StatusEquals(status));
        self
    }

    /// Adds an identifier predicate.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.filters
            .push(JobFilter::IdentifierEquals(identifier.into()));
        self
    }

    /// Adds a converter module predicate.
    #[must_use]
    pub fn with_convert_modules<I>(mut self, modules: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.filters.push(JobFilter::ConvertModuleIn(
            modules.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Adds a creation cutoff predicate.
    #[must_use]
    pub fn created_after(mut self, cutoff: DateTime<Utc>) -> Self {
        self.filters.push(JobFilter::CreatedAfter(cutoff));
        self
    }

    /// Caps the number of rows returned.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sorts newest-created rows first.
    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Checks every filter is well-formed.
    ///
    /// # Errors
    ///
    /// Returns the first filter's [`Error::InvalidFilter`].
    pub fn validate(&self) -> Result<()> {
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }

    /// Returns true when `job` satisfies every filter.
    #[must_use]
    pub fn matches(&self, job: &Job) -> bool {
        self.filters.iter().all(|f| f.matches(job))
    }
}

/// Storage abstraction for job rows.
///
/// Implementations must reject malformed queries with
/// [`Error::InvalidFilter`] and must return rows sorted by creation time
/// (ties broken by job ID) so repeated queries are deterministic.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Gets a job by ID.
    ///
    /// Returns `None` if the row does not exist.
    async fn get(&self, job_id: JobId) -> Result<Option<Job>>;

    /// Saves a job, replacing the whole row. The last writer wins.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Returns every row matching the query, sorted and capped.
    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>>;
}
