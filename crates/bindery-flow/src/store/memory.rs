//! In-memory job store for testing.
//!
//! This module provides [`MemoryJobStore`], a simple in-memory
//! implementation of the [`JobStore`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process
//!   coordination
//! - **Single-process only**: state is not shared across process boundaries
//! - **No persistence**: all state is lost when the process exits

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use bindery_core::JobId;

use super::{JobQuery, JobStore};
use crate::error::{Error, Result};
use crate::job::Job;

/// In-memory job store for testing.
///
/// Thread-safe via `RwLock`; rows are cloned in and out so callers never
/// observe partial writes.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rows currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn job_count(&self) -> Result<usize> {
        let count = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: JobId) -> Result<Option<Job>> {
        let result = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.get(&job_id).cloned()
        };
        Ok(result)
    }

    async fn save(&self, job: &Job) -> Result<()> {
        {
            let mut jobs = self.jobs.write().map_err(poison_err)?;
            jobs.insert(job.job_id, job.clone());
        }
        Ok(())
    }

    async fn query(&self, query: &JobQuery) -> Result<Vec<Job>> {
        query.validate()?;

        let mut rows: Vec<Job> = {
            let jobs = self.jobs.read().map_err(poison_err)?;
            jobs.values().filter(|j| query.matches(j)).cloned().collect()
        };

        rows.sort_by(|a, b| {
            let ordering = if query.newest_first {
                b.created_at.cmp(&a.created_at)
            } else {
                a.created_at.cmp(&b.created_at)
            };
            ordering.then_with(|| a.job_id.cmp(&b.job_id))
        });

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Identifier, JobStatus};
    use bindery_core::CommitRef;
    use chrono::Utc;

    fn commit(sha: &str) -> CommitRef {
        CommitRef::new("unfolding", "en-ulb", sha).expect("valid commit")
    }

    fn job_for(sha: &str) -> Job {
        Job::new(
            JobId::generate(),
            Identifier::Single(commit(sha)),
            commit(sha),
            "unfolding",
            "ulb",
            "usfm",
            "html",
            "https://git.example.test/archive.zip",
        )
    }

    #[tokio::test]
    async fn save_and_get_job() -> Result<()> {
        let store = MemoryJobStore::new();
        let job = job_for("22f3d09f7a");

        assert!(store.get(job.job_id).await?.is_none());

        store.save(&job).await?;

        let retrieved = store.get(job.job_id).await?;
        assert_eq!(retrieved.map(|j| j.job_id), Some(job.job_id));
        Ok(())
    }

    #[tokio::test]
    async fn save_replaces_the_whole_row() -> Result<()> {
        let store = MemoryJobStore::new();
        let mut job = job_for("22f3d09f7a");
        job.warnings.push("first writer".to_string());
        store.save(&job).await?;

        // A second writer who never saw the first write wins completely.
        let mut stale = job_for("22f3d09f7a");
        stale.job_id = job.job_id;
        stale.message = "second writer".to_string();
        store.save(&stale).await?;

        let current = store.get(job.job_id).await?.unwrap();
        assert_eq!(current.message, "second writer");
        assert!(current.warnings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn query_filters_by_status_and_identifier() -> Result<()> {
        let store = MemoryJobStore::new();
        let mut failed = job_for("22f3d09f7a");
        failed.transition_to(JobStatus::Failed)?;
        let requested = job_for("9f7a22f3d0");
        store.save(&failed).await?;
        store.save(&requested).await?;

        let rows = store
            .query(&JobQuery::new().with_status(JobStatus::Failed))
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id, failed.job_id);

        let rows = store
            .query(&JobQuery::new().with_identifier("unfolding/en-ulb/9f7a22f3d0"))
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id, requested.job_id);
        Ok(())
    }

    #[tokio::test]
    async fn query_rejects_empty_module_list() -> Result<()> {
        let store = MemoryJobStore::new();
        let result = store
            .query(&JobQuery::new().with_convert_modules(Vec::<String>::new()))
            .await;
        assert!(matches!(result, Err(Error::InvalidFilter { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn query_orders_and_limits() -> Result<()> {
        let store = MemoryJobStore::new();
        let mut older = job_for("22f3d09f7a");
        older.created_at = Utc::now() - chrono::Duration::minutes(10);
        let newer = job_for("9f7a22f3d0");
        store.save(&older).await?;
        store.save(&newer).await?;

        let rows = store.query(&JobQuery::new()).await?;
        assert_eq!(rows[0].job_id, older.job_id);

        let rows = store.query(&JobQuery::new().newest_first().limit(1)).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id, newer.job_id);
        Ok(())
    }

    #[tokio::test]
    async fn query_honors_created_after() -> Result<()> {
        let store = MemoryJobStore::new();
        let mut old = job_for("22f3d09f7a");
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        let recent = job_for("9f7a22f3d0");
        store.save(&old).await?;
        store.save(&recent).await?;

        let rows = store
            .query(&JobQuery::new().created_after(Utc::now() - chrono::Duration::hours(1)))
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id, recent.job_id);
        Ok(())
    }

    #[tokio::test]
    async fn job_count() -> Result<()> {
        let store = MemoryJobStore::new();
        assert_eq!(store.job_count()?, 0);

        store.save(&job_for("22f3d09f7a")).await?;
        store.save(&job_for("9f7a22f3d0")).await?;
        assert_eq!(store.job_count()?, 2);
        Ok(())
    }
}
