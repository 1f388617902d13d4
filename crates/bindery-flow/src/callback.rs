//! Worker callback aggregation.
//!
//! Converters and linters run out of process and report back through one
//! endpoint each. The aggregator folds a report into its job row,
//! overwrites the part's document in the artifact store, and invokes the
//! completion merge. Converter reports also promote the converted output
//! and write the part's `finished` flag; the merge counts those flags, so
//! a part counts as complete only once its converter has reported. A
//! linter report arriving after that simply re-runs the merge, which
//! folds the new lint results into the master.
//!
//! Converter and linter reports for the same job may race. Every write
//! here is a blind overwrite of a key the racing origin never touches,
//! except the job row itself, where last-writer-wins is accepted.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use bindery_core::storage::{copy_prefix, get_json, put_json};
use bindery_core::{CommitPaths, ObjectStore};

use crate::build_log::{BuildLogDocument, LinterLogDocument};
use crate::error::{Error, Result};
use crate::job::{Identifier, Job, JobStatus};
use crate::merge::{CompletionMerge, MergeOutcome};
use crate::metrics::PipelineMetrics;
use crate::store::{JobQuery, JobStore};

/// One worker's completion report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerCallback {
    /// Composite identifier echoed back from the dispatch payload.
    pub identifier: String,
    /// Whether the worker ran to completion.
    pub success: bool,
    /// Progress lines.
    #[serde(default)]
    pub info: Vec<String>,
    /// Warning lines.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Error lines.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// What handling one report produced.
#[derive(Debug, Clone)]
pub struct CallbackOutcome<D> {
    /// The job row after the report was folded in.
    pub job: Job,
    /// The part document this callback wrote.
    pub document: D,
    /// The merged master, when this report completed the commit.
    pub merged: Option<BuildLogDocument>,
}

impl<D> CallbackOutcome<D> {
    /// Returns true when this report completed the whole commit.
    #[must_use]
    pub fn all_parts_completed(&self) -> bool {
        self.merged.is_some()
    }
}

/// Folds worker completion reports into job rows and part documents.
pub struct CallbackAggregator {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ObjectStore>,
    merge: CompletionMerge,
    metrics: PipelineMetrics,
}

impl CallbackAggregator {
    /// Creates an aggregator over the job store and artifact store.
    #[must_use]
    pub fn new(jobs: Arc<dyn JobStore>, artifacts: Arc<dyn ObjectStore>) -> Self {
        let merge = CompletionMerge::new(Arc::clone(&artifacts));
        Self {
            jobs,
            artifacts,
            merge,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Handles a converter's completion report.
    ///
    /// Appends the report to the job row, promotes the converted output
    /// from the job's working prefix to the part's commit key, computes
    /// the terminal status, rewrites the part's `build_log.json`, writes
    /// its `finished` flag, and invokes the completion merge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedIdentifier`] for an unparseable
    /// identifier and [`Error::JobNotFound`] when no job row matches;
    /// both point at wiring faults, not content failures. Storage and
    /// serialization errors propagate as-is.
    #[tracing::instrument(
        skip(self, callback),
        fields(identifier = %callback.identifier, success = callback.success)
    )]
    pub async fn converter_completed(
        &self,
        callback: &WorkerCallback,
    ) -> Result<CallbackOutcome<BuildLogDocument>> {
        let started = Instant::now();
        let identifier = Identifier::parse(&callback.identifier)?;
        let mut job = self.resolve_job(&identifier, &callback.identifier).await?;
        let paths = job.commit.paths();

        append_report(&mut job, callback);
        let module = job.convert_module.clone();
        job.log_message(converter_summary(module.as_deref(), callback));

        self.promote_converted_output(&mut job, &paths).await;

        let (target, message) = if !callback.success || !job.errors.is_empty() {
            job.success = Some(false);
            (JobStatus::Failed, "Conversion failed")
        } else if !job.warnings.is_empty() {
            job.success = Some(true);
            (JobStatus::Warnings, "Conversion successful with warnings")
        } else {
            job.success = Some(true);
            (JobStatus::Success, "Conversion successful")
        };
        job.transition_to(target)?;
        job.message = message.to_string();
        job.log_message(message);
        if let Some(ended_at) = job.ended_at {
            job.log_message(format!("Finished job {} at {ended_at}", job.job_id));
        }
        self.jobs.save(&job).await?;

        let key = identifier.build_log_key(&paths);
        let mut document: BuildLogDocument = get_json(self.artifacts.as_ref(), &key)
            .await?
            .unwrap_or_else(|| BuildLogDocument::from_job(&job));
        document.apply_job(&job);
        put_json(self.artifacts.as_ref(), &key, &document).await?;

        self.artifacts
            .put(&identifier.finished_flag_key(&paths), Bytes::new())
            .await?;

        let merged = self.run_merge(&job).await?;

        self.metrics
            .record_callback("converter", &job.status.to_string());
        self.metrics
            .observe_callback_duration("converter", started.elapsed());

        Ok(CallbackOutcome {
            job,
            document,
            merged,
        })
    }

    /// Handles a linter's completion report.
    ///
    /// The linter never decides a part's terminal state and never writes
    /// the `finished` flag; completion stays converter-driven. The report
    /// is folded into the job row, the sibling `linter_log.json` is
    /// written, and the merge runs again so lint results arriving after
    /// the converter still reach the master document.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`converter_completed`](Self::converter_completed).
    #[tracing::instrument(
        skip(self, callback),
        fields(identifier = %callback.identifier, success = callback.success)
    )]
    pub async fn linter_completed(
        &self,
        callback: &WorkerCallback,
    ) -> Result<CallbackOutcome<LinterLogDocument>> {
        let started = Instant::now();
        let identifier = Identifier::parse(&callback.identifier)?;
        let mut job = self.resolve_job(&identifier, &callback.identifier).await?;
        let paths = job.commit.paths();

        append_report(&mut job, callback);

        let mut document = LinterLogDocument {
            identifier: callback.identifier.clone(),
            success: callback.success,
            log: callback.info.clone(),
            warnings: callback.warnings.clone(),
            errors: callback.errors.clone(),
        };
        if !callback.success {
            let line = format!("Linter failed for identifier: {}", callback.identifier);
            document.warnings.push(line.clone());
            job.warning_message(line);
        }
        let summary = if document.warnings.is_empty() {
            format!("Linter {} completed with no warnings.", callback.identifier)
        } else {
            format!("Linter {} has warnings.", callback.identifier)
        };
        document.log.push(summary.clone());
        job.log_message(summary);
        self.jobs.save(&job).await?;

        put_json(
            self.artifacts.as_ref(),
            &identifier.linter_log_key(&paths),
            &document,
        )
        .await?;

        let merged = self.run_merge(&job).await?;

        let status = if callback.success { "success" } else { "failed" };
        self.metrics.record_callback("linter", status);
        self.metrics
            .observe_callback_duration("linter", started.elapsed());

        Ok(CallbackOutcome {
            job,
            document,
            merged,
        })
    }

    /// Looks up the job a report belongs to.
    ///
    /// Part identifiers carry their job id as the first segment; single
    /// identifiers are resolved by identifier equality, newest row wins.
    async fn resolve_job(&self, identifier: &Identifier, raw: &str) -> Result<Job> {
        match identifier {
            Identifier::Part { job_id, .. } => self
                .jobs
                .get(*job_id)
                .await?
                .ok_or_else(|| Error::job_not_found(job_id)),
            Identifier::Single(_) => {
                let query = JobQuery::new().with_identifier(raw).newest_first().limit(1);
                let rows = self.jobs.query(&query).await?;
                rows.into_iter().next().ok_or_else(|| Error::job_not_found(raw))
            }
        }
    }

    /// Copies the worker's output from the job's working prefix to the
    /// part's place under the commit key.
    ///
    /// Nothing to copy, or a store fault, degrades the part to a missing
    /// output error instead of aborting the callback.
    async fn promote_converted_output(&self, job: &mut Job, paths: &CommitPaths) {
        let destination = job.identifier.artifact_prefix(paths);
        match copy_prefix(self.artifacts.as_ref(), &job.cdn_file, &destination).await {
            Ok(0) => {
                job.error_message(format!("Missing converted output: {}", job.cdn_file));
            }
            Ok(copied) => {
                tracing::debug!(copied, destination = %destination, "promoted converted output");
            }
            Err(e) => {
                tracing::warn!(error = %e, "promoting converted output failed");
                job.error_message(format!("Missing converted output: {}", job.cdn_file));
            }
        }
    }

    async fn run_merge(&self, job: &Job) -> Result<Option<BuildLogDocument>> {
        let outcome = self
            .merge
            .check_and_merge(&job.commit, job.identifier.part_count())
            .await?;
        match outcome {
            MergeOutcome::Merged(master) => Ok(Some(master)),
            MergeOutcome::Incomplete { present, expected } => {
                tracing::debug!(
                    present,
                    expected,
                    commit = %job.commit,
                    "commit not yet complete"
                );
                Ok(None)
            }
        }
    }
}

/// Appends a report's lists to the job's, never replacing.
fn append_report(job: &mut Job, callback: &WorkerCallback) {
    for line in &callback.info {
        job.log_message(line.as_str());
    }
    for line in &callback.warnings {
        job.warning_message(line.as_str());
    }
    for line in &callback.errors {
        job.error_message(line.as_str());
    }
}

/// The synthesized summary line for a converter report.
fn converter_summary(module: Option<&str>, callback: &WorkerCallback) -> String {
    let module = module.unwrap_or("converter");
    if !callback.errors.is_empty() {
        format!("{module} returned with errors.")
    } else if !callback.warnings.is_empty() {
        format!("{module} returned with warnings.")
    } else {
        format!("{module} returned successfully.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_log::BuildStatus;
    use crate::store::MemoryJobStore;
    use bindery_core::paths::job_output_prefix;
    use bindery_core::{CommitRef, JobId, MemoryStore};

    struct Fixture {
        aggregator: CallbackAggregator,
        jobs: Arc<MemoryJobStore>,
        artifacts: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let jobs = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(MemoryStore::new());
        let aggregator = CallbackAggregator::new(
            Arc::clone(&jobs) as Arc<dyn JobStore>,
            Arc::clone(&artifacts) as Arc<dyn ObjectStore>,
        );
        Fixture {
            aggregator,
            jobs,
            artifacts,
        }
    }

    fn commit() -> CommitRef {
        CommitRef::new("unfolding", "en-ulb", "22f3d09f7a").expect("valid commit")
    }

    fn dispatched_job(identifier: Identifier, job_id: JobId) -> Job {
        let mut job = Job::new(
            job_id,
            identifier,
            commit(),
            "door-keeper",
            "ulb",
            "usfm",
            "html",
            "https://git.example.org/unfolding/en-ulb/archive/master.zip",
        );
        job.convert_module = Some("usfm2html".to_string());
        job.lint_module = Some("usfm_linter".to_string());
        job.cdn_file = job_output_prefix(job.job_id);
        job.transition_to(JobStatus::Started).unwrap();
        job
    }

    fn single_job() -> Job {
        dispatched_job(Identifier::Single(commit()), JobId::generate())
    }

    fn part_job(part_count: u32, part_index: u32, book: &str) -> Job {
        let job_id = JobId::generate();
        dispatched_job(
            Identifier::Part {
                job_id,
                part_count,
                part_index,
                book: book.to_string(),
            },
            job_id,
        )
    }

    async fn seed(fx: &Fixture, job: &Job) -> Result<()> {
        fx.jobs.save(job).await?;
        let mut doc = BuildLogDocument::from_job(job);
        doc.committed_by = Some("translator".to_string());
        doc.cdn_bucket = Some("bindery-artifacts".to_string());
        put_json(
            fx.artifacts.as_ref(),
            &job.identifier.build_log_key(&job.commit.paths()),
            &doc,
        )
        .await?;
        Ok(())
    }

    async fn seed_output(fx: &Fixture, job: &Job) -> Result<()> {
        fx.artifacts
            .put(
                &format!("{}01-GEN.html", job.cdn_file),
                Bytes::from_static(b"<html></html>"),
            )
            .await?;
        Ok(())
    }

    fn report(identifier: &Identifier, success: bool) -> WorkerCallback {
        WorkerCallback {
            identifier: identifier.to_string(),
            success,
            info: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[tokio::test]
    async fn clean_converter_report_completes_a_single_commit() -> Result<()> {
        let fx = fixture();
        let job = single_job();
        seed(&fx, &job).await?;
        seed_output(&fx, &job).await?;

        let mut callback = report(&job.identifier, true);
        callback.info = vec!["Converted 1 book".to_string()];
        let outcome = fx.aggregator.converter_completed(&callback).await?;

        assert_eq!(outcome.job.status, JobStatus::Success);
        assert_eq!(outcome.job.success, Some(true));
        assert_eq!(outcome.job.message, "Conversion successful");
        assert!(
            outcome
                .job
                .log
                .iter()
                .any(|l| l == "usfm2html returned successfully.")
        );
        assert!(outcome.job.log.iter().any(|l| l.starts_with("Finished job ")));

        assert!(
            fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/01-GEN.html")
                .await?
        );
        assert!(
            fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/finished")
                .await?
        );

        assert_eq!(outcome.document.status, BuildStatus::Success);
        assert_eq!(outcome.document.committed_by.as_deref(), Some("translator"));
        assert!(outcome.all_parts_completed());
        let master = outcome.merged.unwrap();
        assert!(master.is_master());
        assert_eq!(master.status, BuildStatus::Success);

        let stored: BuildLogDocument = get_json(
            fx.artifacts.as_ref(),
            "unfolding/en-ulb/22f3d09f7a/build_log.json",
        )
        .await?
        .unwrap();
        assert!(stored.is_master());
        Ok(())
    }

    #[tokio::test]
    async fn converter_errors_fail_the_part() -> Result<()> {
        let fx = fixture();
        let job = single_job();
        seed(&fx, &job).await?;
        seed_output(&fx, &job).await?;

        let mut callback = report(&job.identifier, true);
        callback.errors = vec!["GEN 1:1 bad verse".to_string()];
        let outcome = fx.aggregator.converter_completed(&callback).await?;

        assert_eq!(outcome.job.status, JobStatus::Failed);
        assert_eq!(outcome.job.success, Some(false));
        assert_eq!(outcome.job.message, "Conversion failed");
        assert!(
            outcome
                .job
                .log
                .iter()
                .any(|l| l == "usfm2html returned with errors.")
        );
        assert_eq!(outcome.job.errors, vec!["GEN 1:1 bad verse".to_string()]);

        let master = outcome.merged.unwrap();
        assert_eq!(master.status, BuildStatus::Errors);
        assert_eq!(master.errors, vec!["22f3d09f7a: GEN 1:1 bad verse".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn reported_failure_without_error_lines_still_fails() -> Result<()> {
        let fx = fixture();
        let job = single_job();
        seed(&fx, &job).await?;
        seed_output(&fx, &job).await?;

        let outcome = fx
            .aggregator
            .converter_completed(&report(&job.identifier, false))
            .await?;

        assert_eq!(outcome.job.status, JobStatus::Failed);
        assert_eq!(outcome.job.success, Some(false));
        Ok(())
    }

    #[tokio::test]
    async fn missing_output_fails_the_part() -> Result<()> {
        let fx = fixture();
        let job = single_job();
        seed(&fx, &job).await?;

        let outcome = fx
            .aggregator
            .converter_completed(&report(&job.identifier, true))
            .await?;

        assert_eq!(outcome.job.status, JobStatus::Failed);
        let expected = format!("Missing converted output: {}", job.cdn_file);
        assert!(outcome.job.errors.contains(&expected));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_job_is_a_hard_error() {
        let fx = fixture();
        let identifier = Identifier::Part {
            job_id: JobId::generate(),
            part_count: 2,
            part_index: 0,
            book: "01-GEN".to_string(),
        };

        let err = fx
            .aggregator
            .converter_completed(&report(&identifier, true))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn first_part_report_leaves_the_commit_incomplete() -> Result<()> {
        let fx = fixture();
        let first = part_job(2, 0, "01-GEN");
        let second = part_job(2, 1, "02-EXO");
        seed(&fx, &first).await?;
        seed(&fx, &second).await?;
        seed_output(&fx, &first).await?;

        let outcome = fx
            .aggregator
            .converter_completed(&report(&first.identifier, true))
            .await?;

        assert!(!outcome.all_parts_completed());
        assert!(
            fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/0/finished")
                .await?
        );
        let master: Option<BuildLogDocument> = get_json(
            fx.artifacts.as_ref(),
            "unfolding/en-ulb/22f3d09f7a/build_log.json",
        )
        .await?;
        assert!(master.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn last_part_report_merges_the_commit() -> Result<()> {
        let fx = fixture();
        let first = part_job(2, 0, "01-GEN");
        let second = part_job(2, 1, "02-EXO");
        seed(&fx, &first).await?;
        seed(&fx, &second).await?;
        seed_output(&fx, &first).await?;
        seed_output(&fx, &second).await?;

        fx.aggregator
            .converter_completed(&report(&first.identifier, true))
            .await?;

        let mut callback = report(&second.identifier, true);
        callback.warnings = vec!["EXO 2:1 sparse chapter".to_string()];
        let outcome = fx.aggregator.converter_completed(&callback).await?;

        assert!(outcome.all_parts_completed());
        let master = outcome.merged.unwrap();
        assert_eq!(master.status, BuildStatus::Warnings);
        assert_eq!(
            master.warnings,
            vec!["02-EXO: EXO 2:1 sparse chapter".to_string()]
        );
        assert_eq!(master.build_logs.as_ref().map(Vec::len), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn linter_report_writes_the_lint_document_but_never_the_flag() -> Result<()> {
        let fx = fixture();
        let job = single_job();
        seed(&fx, &job).await?;

        let mut callback = report(&job.identifier, false);
        callback.warnings = vec!["GEN 1:3 odd spacing".to_string()];
        let outcome = fx.aggregator.linter_completed(&callback).await?;

        let failure = format!("Linter failed for identifier: {}", job.identifier);
        assert!(outcome.document.warnings.contains(&failure));
        assert!(
            outcome
                .document
                .log
                .last()
                .is_some_and(|l| l.ends_with("has warnings."))
        );
        assert!(!outcome.all_parts_completed());

        let row = fx.jobs.get(job.job_id).await?.unwrap();
        assert!(row.warnings.contains(&failure));
        assert_eq!(row.status, JobStatus::Started);

        assert!(
            fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/linter_log.json")
                .await?
        );
        assert!(
            !fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/finished")
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn late_lint_report_reaches_the_master() -> Result<()> {
        let fx = fixture();
        let job = single_job();
        seed(&fx, &job).await?;
        seed_output(&fx, &job).await?;

        let first = fx
            .aggregator
            .converter_completed(&report(&job.identifier, true))
            .await?;
        assert_eq!(first.merged.unwrap().status, BuildStatus::Success);

        let mut lint = report(&job.identifier, true);
        lint.warnings = vec!["GEN 1:3 odd spacing".to_string()];
        let outcome = fx.aggregator.linter_completed(&lint).await?;

        assert!(outcome.all_parts_completed());
        let master = outcome.merged.unwrap();
        assert_eq!(master.status, BuildStatus::Warnings);
        assert!(
            master
                .warnings
                .contains(&"22f3d09f7a: GEN 1:3 odd spacing".to_string())
        );
        Ok(())
    }

    #[test]
    fn report_lists_default_to_empty() {
        let raw = serde_json::json!({
            "identifier": "unfolding/en-ulb/22f3d09f7a",
            "success": true
        });
        let callback: WorkerCallback = serde_json::from_value(raw).unwrap();
        assert!(callback.info.is_empty());
        assert!(callback.warnings.is_empty());
        assert!(callback.errors.is_empty());
    }
}
