//! Submission fan-out.
//!
//! One webhook submission becomes 1..N jobs, one per independently
//! convertible part. The splitter persists every job row, seeds the
//! per-part build log documents, dispatches one converter invocation per
//! part (plus one linter invocation when a linter is registered for the
//! resource type), and optionally blocks on a completion rendezvous until
//! the linters report back.
//!
//! Parts that cannot be dispatched are failed in place, flagged as
//! finished, and never abort their siblings. The webhook response carries
//! every created job either way.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use bindery_core::observability::submission_span;
use bindery_core::paths::job_output_prefix;
use bindery_core::storage::{get_json, put_json};
use bindery_core::{CommitPaths, CommitRef, Config, JobId, ObjectStore};

use crate::build_log::{BuildLogDocument, CommitEntry, ProjectManifest};
use crate::dispatch::{Invoker, WorkerRequest};
use crate::error::Result;
use crate::job::{Identifier, Job, JobStatus, Link};
use crate::merge::{CompletionMerge, MergeOutcome};
use crate::metrics::PipelineMetrics;
use crate::modules::ModuleRegistry;
use crate::queue::{CompletionQueue, QueueMessage};
use crate::rendezvous::{CompletionRendezvous, WaitOptions};
use crate::store::JobStore;

/// One webhook submission, decoded once at the trigger boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubmission {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Full commit sha the webhook fired for.
    pub commit_sha: String,
    /// User the submission runs as.
    pub user: String,
    /// Resource type of the repository content (e.g. `ulb`, `obs`).
    pub resource_type: String,
    /// Format the source arrives in (e.g. `usfm`, `md`).
    pub input_format: String,
    /// Format the converters must produce (e.g. `html`).
    pub output_format: String,
    /// Shared source archive URL; parts append a per-book selector.
    pub source: String,
    /// Converter options, passed through to the workers untouched.
    #[serde(default = "default_options")]
    pub options: serde_json::Value,
    /// Source repository URL, carried into `project.json`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repo_url: Option<String>,
    /// Commit URL from the webhook event.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_url: Option<String>,
    /// Compare URL from the webhook event.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compare_url: Option<String>,
    /// Commit message from the webhook event.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_message: Option<String>,
    /// Display name of the pusher.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub committed_by: Option<String>,
}

fn default_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// The preprocessor's verdict on how a repository splits.
///
/// The book order is the preprocessor's and is never re-sorted here;
/// part indices follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preprocessed {
    /// The repository converts as one document.
    Single,
    /// The repository splits into these books, in conversion order.
    ///
    /// A list of fewer than two books is treated as
    /// [`Preprocessed::Single`]; a one-part split would leave nothing to
    /// merge.
    Books(Vec<String>),
}

/// What one processed submission produced.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    /// The persisted jobs, part 0 first.
    pub jobs: Vec<Job>,
    /// The commit-level build log written at submission time, or the
    /// merged master when every part already failed at split.
    pub build_log: BuildLogDocument,
}

/// One part after persistence and dispatch, before the lint rendezvous.
struct PreparedPart {
    job: Job,
    doc: BuildLogDocument,
    lint_key: Option<String>,
}

/// Fans one webhook submission out into per-part jobs and dispatches them.
pub struct JobSplitter {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ObjectStore>,
    registry: ModuleRegistry,
    invoker: Arc<dyn Invoker>,
    queue: Arc<dyn CompletionQueue>,
    config: Config,
    merge: CompletionMerge,
    metrics: PipelineMetrics,
}

impl JobSplitter {
    /// Creates a splitter over the injected collaborators.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        artifacts: Arc<dyn ObjectStore>,
        registry: ModuleRegistry,
        invoker: Arc<dyn Invoker>,
        queue: Arc<dyn CompletionQueue>,
        config: Config,
    ) -> Self {
        let merge = CompletionMerge::new(Arc::clone(&artifacts));
        Self {
            jobs,
            artifacts,
            registry,
            invoker,
            queue,
            config,
            merge,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Processes one webhook submission end to end.
    ///
    /// Creates and persists one job per part, seeds the build log
    /// documents, dispatches the workers, and, when linter-wait is
    /// enabled, folds the lint completions into the job rows before
    /// returning. A part that cannot be dispatched is failed in place;
    /// the submission as a whole still succeeds.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unusable owner/repo/commit
    /// triple, and storage or serialization errors as-is. Worker dispatch
    /// refusals are not errors here; they surface on the affected job.
    pub async fn process(
        &self,
        submission: &WebhookSubmission,
        preprocessed: &Preprocessed,
    ) -> Result<SubmissionOutcome> {
        let commit = CommitRef::from_long_sha(
            submission.owner.as_str(),
            submission.repo.as_str(),
            &submission.commit_sha,
        )?;
        let span = submission_span("split", commit.owner(), commit.repo(), commit.commit());
        self.run_split(submission, preprocessed, commit)
            .instrument(span)
            .await
    }

    async fn run_split(
        &self,
        submission: &WebhookSubmission,
        preprocessed: &Preprocessed,
        commit: CommitRef,
    ) -> Result<SubmissionOutcome> {
        let paths = commit.paths();

        self.reset_commit_prefix(&commit).await?;

        let jobs = self.build_jobs(submission, &commit, preprocessed)?;
        let part_count = jobs.first().map_or(1, |job| job.identifier.part_count());

        let mut parts = Vec::with_capacity(jobs.len());
        for job in jobs {
            parts.push(self.prepare_and_dispatch(job, submission, &paths).await?);
        }

        if self.config.wait_for_linters {
            self.await_linters(&mut parts).await?;
        }

        let mut build_log = self.write_commit_snapshot(&commit, &paths, &parts).await?;
        self.update_project_manifest(&commit, &paths, submission, &build_log)
            .await?;

        // A part that failed at split already has its finished flag, so
        // when every part failed no callback is left to trigger the merge.
        if parts.iter().any(|part| part.job.status == JobStatus::Failed) {
            if let MergeOutcome::Merged(master) =
                self.merge.check_and_merge(&commit, part_count).await?
            {
                build_log = master;
            }
        }

        self.metrics.record_submission(part_count);
        tracing::info!(
            commit = %commit,
            parts = part_count,
            user = %submission.user,
            "submission dispatched"
        );

        Ok(SubmissionOutcome {
            jobs: parts.into_iter().map(|part| part.job).collect(),
            build_log,
        })
    }

    /// Deletes artifacts a previous run of the same commit left behind.
    ///
    /// A stale `finished` or `deployed` flag from an earlier run would
    /// short-circuit this run's merge or deploy.
    async fn reset_commit_prefix(&self, commit: &CommitRef) -> Result<()> {
        let stale = self.artifacts.list(&commit.paths().prefix()).await?;
        if stale.is_empty() {
            return Ok(());
        }
        tracing::info!(
            commit = %commit,
            count = stale.len(),
            "clearing artifacts from a previous run of this commit"
        );
        for meta in stale {
            self.artifacts.delete(&meta.path).await?;
        }
        Ok(())
    }

    fn build_jobs(
        &self,
        submission: &WebhookSubmission,
        commit: &CommitRef,
        preprocessed: &Preprocessed,
    ) -> Result<Vec<Job>> {
        match preprocessed {
            Preprocessed::Books(books) if books.len() > 1 => {
                self.part_jobs(submission, commit, books)
            }
            _ => {
                let job_id = JobId::generate();
                let identifier = Identifier::Single(commit.clone());
                Ok(vec![self.webhook_job(submission, commit, identifier, job_id)])
            }
        }
    }

    /// Builds the webhook's own job: the one record every other part is
    /// cloned from.
    fn webhook_job(
        &self,
        submission: &WebhookSubmission,
        commit: &CommitRef,
        identifier: Identifier,
        job_id: JobId,
    ) -> Job {
        let mut job = Job::new(
            job_id,
            identifier,
            commit.clone(),
            submission.user.as_str(),
            submission.resource_type.as_str(),
            submission.input_format.as_str(),
            submission.output_format.as_str(),
            submission.source.as_str(),
        );
        job.options = submission.options.clone();
        self.derive_job_outputs(&mut job);
        job
    }

    /// Builds one job per book. Part 0 keeps the webhook job's id and the
    /// shared archive URL; later parts get a fresh id, a per-book source
    /// selector, and outputs re-derived from their own id.
    fn part_jobs(
        &self,
        submission: &WebhookSubmission,
        commit: &CommitRef,
        books: &[String],
    ) -> Result<Vec<Job>> {
        let part_count = u32::try_from(books.len()).map_err(|_| {
            bindery_core::Error::InvalidInput(format!(
                "cannot split a submission into {} parts",
                books.len()
            ))
        })?;
        let Some((first_book, rest)) = books.split_first() else {
            return Err(bindery_core::Error::InvalidInput(
                "cannot split a submission with no books".to_string(),
            )
            .into());
        };

        let first_id = JobId::generate();
        let identifier = Identifier::Part {
            job_id: first_id,
            part_count,
            part_index: 0,
            book: first_book.clone(),
        };
        let first = self.webhook_job(submission, commit, identifier, first_id);

        let mut jobs = Vec::with_capacity(books.len());
        jobs.push(first);
        for (part_index, book) in (1_u32..).zip(rest) {
            let job_id = JobId::generate();
            let mut job = jobs[0].clone();
            job.job_id = job_id;
            job.identifier = Identifier::Part {
                job_id,
                part_count,
                part_index,
                book: book.clone(),
            };
            job.source = format!("{}?convert_only={book}", submission.source);
            self.derive_job_outputs(&mut job);
            jobs.push(job);
        }
        Ok(jobs)
    }

    /// Re-derives the fields that hang off a job's own id.
    fn derive_job_outputs(&self, job: &mut Job) {
        job.cdn_file = job_output_prefix(job.job_id);
        job.output = self.config.output_url(&job.cdn_file);
        job.links = vec![Link::self_link(&self.config.api_url, job.job_id)];
    }

    /// Persists one part, seeds its build log, and dispatches its
    /// workers.
    ///
    /// The requested row and the seed document are written before the
    /// converter fires, so a worker callback always finds both.
    async fn prepare_and_dispatch(
        &self,
        mut job: Job,
        submission: &WebhookSubmission,
        paths: &CommitPaths,
    ) -> Result<PreparedPart> {
        let Some(converter) = self.registry.find_converter(
            &job.resource_type,
            &job.input_format,
            &job.output_format,
        ) else {
            job.error_message(format!(
                "No converter was found to convert {} from {} to {}",
                job.resource_type, job.input_format, job.output_format
            ));
            return self
                .persist_split_failure(job, "No converter found", submission, paths)
                .await;
        };
        job.convert_module = Some(converter.name.clone());
        job.lint_module = self
            .registry
            .find_linter(&job.resource_type)
            .map(|linter| linter.name.clone());

        self.jobs.save(&job).await?;
        self.write_part_build_log(&job, submission, paths).await?;

        let function = self.config.convert_function(&converter.name);
        let payload = WorkerRequest::convert_request(&job, &self.config).to_payload()?;
        if let Err(e) = self.invoker.invoke(&function, payload).await {
            self.metrics.record_dispatch("convert", "error");
            job.error_message(format!("Failed to invoke converter: {e}"));
            return self
                .persist_split_failure(job, "Conversion failed", submission, paths)
                .await;
        }
        self.metrics.record_dispatch("convert", "ok");

        let lint_key = self.dispatch_linter(&mut job).await?;

        job.transition_to(JobStatus::Started)?;
        job.message = "Conversion started".to_string();
        if let Some(started_at) = job.started_at {
            job.log_message(format!("Started job {} at {started_at}", job.job_id));
        }
        self.jobs.save(&job).await?;

        let doc = self.write_part_build_log(&job, submission, paths).await?;
        Ok(PreparedPart {
            job,
            doc,
            lint_key,
        })
    }

    /// Fails a part that never dispatched: row saved, document rewritten,
    /// finished flag set so the sibling-driven merge still completes.
    async fn persist_split_failure(
        &self,
        mut job: Job,
        message: &str,
        submission: &WebhookSubmission,
        paths: &CommitPaths,
    ) -> Result<PreparedPart> {
        job.success = Some(false);
        job.transition_to(JobStatus::Failed)?;
        job.message = message.to_string();
        self.jobs.save(&job).await?;

        let doc = self.write_part_build_log(&job, submission, paths).await?;
        self.artifacts
            .put(&job.identifier.finished_flag_key(paths), Bytes::new())
            .await?;
        Ok(PreparedPart {
            job,
            doc,
            lint_key: None,
        })
    }

    /// Fires the part's linter, handing it the rendezvous key its results
    /// must land under. A refusal is a warning on the job, never fatal.
    async fn dispatch_linter(&self, job: &mut Job) -> Result<Option<String>> {
        let Some(module) = job.lint_module.clone() else {
            return Ok(None);
        };
        let results_key = format!("lint/{}", job.job_id);
        let payload =
            WorkerRequest::lint_request(job, &self.config, results_key.as_str()).to_payload()?;
        let function = self.config.lint_function(&module);
        if let Err(e) = self.invoker.invoke(&function, payload).await {
            self.metrics.record_dispatch("lint", "error");
            job.warning_message(format!("Failed to invoke linter: {e}"));
            return Ok(None);
        }
        self.metrics.record_dispatch("lint", "ok");
        Ok(Some(results_key))
    }

    /// Writes the part's `build_log.json` snapshot, carrying the
    /// submission metadata that job rows never hold.
    async fn write_part_build_log(
        &self,
        job: &Job,
        submission: &WebhookSubmission,
        paths: &CommitPaths,
    ) -> Result<BuildLogDocument> {
        let mut doc = BuildLogDocument::from_job(job);
        doc.committed_by = submission.committed_by.clone();
        doc.commit_message = submission.commit_message.clone();
        doc.commit_url = submission.commit_url.clone();
        doc.compare_url = submission.compare_url.clone();
        doc.cdn_bucket = Some(self.config.cdn_bucket.clone());
        put_json(
            self.artifacts.as_ref(),
            &job.identifier.build_log_key(paths),
            &doc,
        )
        .await?;
        Ok(doc)
    }

    /// Blocks until every dispatched linter reports through the
    /// completion queue or the configured timeout passes, then folds the
    /// outcomes into the job rows.
    async fn await_linters(&self, parts: &mut [PreparedPart]) -> Result<()> {
        let keys: Vec<String> = parts
            .iter()
            .filter_map(|part| part.lint_key.clone())
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let mut rendezvous = CompletionRendezvous::new(Arc::clone(&self.queue));
        rendezvous.clear_old(&keys).await;

        let options = WaitOptions::new().with_timeout(self.config.linter_wait_timeout());
        let started = std::time::Instant::now();
        let complete = rendezvous.wait_for(&keys, &options).await;
        self.metrics.observe_rendezvous_wait(
            if complete { "complete" } else { "timeout" },
            started.elapsed(),
        );

        for part in parts.iter_mut().filter(|part| part.lint_key.is_some()) {
            let message = part
                .lint_key
                .as_ref()
                .and_then(|key| rendezvous.received().get(key));
            fold_lint_outcome(&mut part.job, message);
            self.jobs.save(&part.job).await?;
        }
        Ok(())
    }

    /// Writes the commit-level build log for the submission.
    ///
    /// A single-part submission already wrote it as the part document; a
    /// multi-part one gets a master snapshot with the parts attached
    /// under `build_logs`.
    async fn write_commit_snapshot(
        &self,
        commit: &CommitRef,
        paths: &CommitPaths,
        parts: &[PreparedPart],
    ) -> Result<BuildLogDocument> {
        let Some(first) = parts.first() else {
            return Err(bindery_core::Error::InvalidInput(
                "submission produced no parts".to_string(),
            )
            .into());
        };
        if parts.len() == 1 {
            return Ok(first.doc.clone());
        }

        let mut master = first.doc.clone();
        master.identifier = commit.to_string();
        master.build_logs = Some(parts.iter().map(|part| part.doc.clone()).collect());
        put_json(self.artifacts.as_ref(), &paths.build_log(), &master).await?;
        Ok(master)
    }

    /// Adds or refreshes this commit's entry in the repository
    /// `project.json`.
    async fn update_project_manifest(
        &self,
        commit: &CommitRef,
        paths: &CommitPaths,
        submission: &WebhookSubmission,
        build_log: &BuildLogDocument,
    ) -> Result<()> {
        let key = paths.project_manifest();
        let mut manifest: ProjectManifest = get_json(self.artifacts.as_ref(), &key)
            .await?
            .unwrap_or_else(|| ProjectManifest::new(commit.owner(), commit.repo()));
        if submission.repo_url.is_some() {
            manifest.repo_url = submission.repo_url.clone();
        }
        manifest.upsert_commit(CommitEntry::from_build_log(build_log));
        put_json(self.artifacts.as_ref(), &key, &manifest).await?;
        Ok(())
    }
}

/// Folds one lint completion (or its absence) into a job row.
fn fold_lint_outcome(job: &mut Job, message: Option<&QueueMessage>) {
    match message {
        Some(message) => {
            if !message.success {
                job.warning_message(format!("Linter failed for source: {}", job.source));
            }
            let warnings = message
                .payload
                .as_ref()
                .and_then(|payload| payload.get("warnings"))
                .and_then(serde_json::Value::as_array);
            if let Some(warnings) = warnings {
                for warning in warnings.iter().filter_map(serde_json::Value::as_str) {
                    job.warning_message(warning);
                }
            }
        }
        None => {
            job.warning_message(format!("Linter didn't complete for file: {}", job.source));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_log::BuildStatus;
    use crate::dispatch::MemoryInvoker;
    use crate::modules::{ModuleKind, ModuleSpec};
    use crate::queue::MemoryQueue;
    use crate::store::MemoryJobStore;
    use bindery_core::MemoryStore;

    struct Fixture {
        splitter: JobSplitter,
        jobs: Arc<MemoryJobStore>,
        artifacts: Arc<MemoryStore>,
        invoker: Arc<MemoryInvoker>,
    }

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register(ModuleSpec::new(
            "usfm2html",
            ModuleKind::Converter,
            ["ulb", "udb", "bible"],
            ["usfm"],
            ["html"],
        ));
        registry.register(ModuleSpec::new(
            "usfm_linter",
            ModuleKind::Linter,
            ["ulb", "udb", "bible"],
            ["usfm"],
            Vec::<String>::new(),
        ));
        registry
    }

    fn fixture(config: Config) -> Fixture {
        fixture_with(registry(), config)
    }

    fn fixture_with(registry: ModuleRegistry, config: Config) -> Fixture {
        let jobs = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(MemoryStore::new());
        let invoker = Arc::new(MemoryInvoker::new());
        let queue = Arc::new(MemoryQueue::new("lint-completions"));
        let splitter = JobSplitter::new(
            Arc::clone(&jobs) as Arc<dyn JobStore>,
            Arc::clone(&artifacts) as Arc<dyn ObjectStore>,
            registry,
            Arc::clone(&invoker) as Arc<dyn Invoker>,
            Arc::clone(&queue) as Arc<dyn CompletionQueue>,
            config,
        );
        Fixture {
            splitter,
            jobs,
            artifacts,
            invoker,
        }
    }

    fn no_wait_config() -> Config {
        Config {
            wait_for_linters: false,
            ..Config::default()
        }
    }

    fn submission() -> WebhookSubmission {
        WebhookSubmission {
            owner: "unfolding".to_string(),
            repo: "en-ulb".to_string(),
            commit_sha: "22f3d09f7a1b2c3d4e5f60718293a4b5c6d7e8f9".to_string(),
            user: "door-keeper".to_string(),
            resource_type: "ulb".to_string(),
            input_format: "usfm".to_string(),
            output_format: "html".to_string(),
            source: "https://git.example.org/unfolding/en-ulb/archive/master.zip".to_string(),
            options: serde_json::json!({"line_spacing": "120%"}),
            repo_url: Some("https://git.example.org/unfolding/en-ulb".to_string()),
            commit_url: Some(
                "https://git.example.org/unfolding/en-ulb/commit/22f3d09f7a".to_string(),
            ),
            compare_url: Some(
                "https://git.example.org/unfolding/en-ulb/compare/a1b2c3...22f3d0".to_string(),
            ),
            commit_message: Some("Fix Genesis chapter headings".to_string()),
            committed_by: Some("translator".to_string()),
        }
    }

    fn sample_job() -> Job {
        let commit = CommitRef::new("unfolding", "en-ulb", "22f3d09f7a").expect("valid commit");
        Job::new(
            JobId::generate(),
            Identifier::Single(commit.clone()),
            commit,
            "door-keeper",
            "ulb",
            "usfm",
            "html",
            "https://git.example.org/unfolding/en-ulb/archive/master.zip",
        )
    }

    #[tokio::test]
    async fn single_submission_dispatches_converter_and_linter() -> Result<()> {
        let fx = fixture(no_wait_config());
        let outcome = fx
            .splitter
            .process(&submission(), &Preprocessed::Single)
            .await?;

        assert_eq!(outcome.jobs.len(), 1);
        let job = &outcome.jobs[0];
        assert_eq!(job.identifier.to_string(), "unfolding/en-ulb/22f3d09f7a");
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(job.message, "Conversion started");
        assert_eq!(job.convert_module.as_deref(), Some("usfm2html"));
        assert_eq!(job.lint_module.as_deref(), Some("usfm_linter"));
        assert_eq!(job.cdn_file, format!("jobs/{}/output/", job.job_id));

        let invocations = fx.invoker.invocations().unwrap();
        assert_eq!(invocations.len(), 2);
        assert_eq!(invocations[0].function, "bindery_convert_usfm2html");
        assert_eq!(invocations[1].function, "bindery_lint_usfm_linter");
        let convert = WorkerRequest::from_payload(&invocations[0].payload)?;
        assert_eq!(convert.identifier, "unfolding/en-ulb/22f3d09f7a");
        assert!(convert.results_key().is_none());
        let lint = WorkerRequest::from_payload(&invocations[1].payload)?;
        assert_eq!(
            lint.results_key(),
            Some(format!("lint/{}", job.job_id).as_str())
        );

        let doc: BuildLogDocument = get_json(
            fx.artifacts.as_ref(),
            "unfolding/en-ulb/22f3d09f7a/build_log.json",
        )
        .await?
        .unwrap();
        assert_eq!(doc.status, BuildStatus::Started);
        assert_eq!(doc.committed_by.as_deref(), Some("translator"));
        assert_eq!(doc.cdn_bucket.as_deref(), Some("bindery-artifacts"));
        assert!(doc.build_logs.is_none());

        let manifest: ProjectManifest =
            get_json(fx.artifacts.as_ref(), "unfolding/en-ulb/project.json")
                .await?
                .unwrap();
        assert!(manifest.commit("22f3d09f7a").is_some());
        assert_eq!(
            manifest.repo_url.as_deref(),
            Some("https://git.example.org/unfolding/en-ulb")
        );

        let row = fx.jobs.get(job.job_id).await?.unwrap();
        assert_eq!(row.status, JobStatus::Started);
        Ok(())
    }

    #[tokio::test]
    async fn multi_submission_creates_one_part_per_book() -> Result<()> {
        let fx = fixture(no_wait_config());
        let books = Preprocessed::Books(vec![
            "01-GEN".to_string(),
            "02-EXO".to_string(),
            "03-LEV".to_string(),
        ]);
        let outcome = fx.splitter.process(&submission(), &books).await?;

        assert_eq!(outcome.jobs.len(), 3);
        for (index, job) in (0_u32..).zip(&outcome.jobs) {
            assert_eq!(job.identifier.part_count(), 3);
            assert_eq!(job.identifier.part_index(), Some(index));
            assert_eq!(job.status, JobStatus::Started);
            assert_eq!(job.cdn_file, format!("jobs/{}/output/", job.job_id));
        }
        assert_eq!(outcome.jobs[0].source, submission().source);
        assert!(outcome.jobs[1].source.ends_with("?convert_only=02-EXO"));
        assert!(outcome.jobs[2].source.ends_with("?convert_only=03-LEV"));

        let ids: std::collections::HashSet<JobId> =
            outcome.jobs.iter().map(|job| job.job_id).collect();
        assert_eq!(ids.len(), 3);

        let master: BuildLogDocument = get_json(
            fx.artifacts.as_ref(),
            "unfolding/en-ulb/22f3d09f7a/build_log.json",
        )
        .await?
        .unwrap();
        assert!(master.is_master());
        assert_eq!(master.identifier, "unfolding/en-ulb/22f3d09f7a");
        assert_eq!(master.build_logs.as_ref().map(Vec::len), Some(3));

        for index in 0..3_u32 {
            let key = format!("unfolding/en-ulb/22f3d09f7a/{index}/build_log.json");
            let part: Option<BuildLogDocument> = get_json(fx.artifacts.as_ref(), &key).await?;
            assert!(part.is_some(), "missing part document {key}");
        }

        assert_eq!(fx.invoker.invocation_count().unwrap(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn one_book_split_behaves_as_single() -> Result<()> {
        let fx = fixture(no_wait_config());
        let outcome = fx
            .splitter
            .process(
                &submission(),
                &Preprocessed::Books(vec!["01-GEN".to_string()]),
            )
            .await?;

        assert_eq!(outcome.jobs.len(), 1);
        assert!(!outcome.jobs[0].identifier.is_part());
        assert_eq!(outcome.jobs[0].identifier.part_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_converter_fails_every_part_and_still_merges() -> Result<()> {
        let fx = fixture_with(ModuleRegistry::new(), no_wait_config());
        let books = Preprocessed::Books(vec!["01-GEN".to_string(), "02-EXO".to_string()]);
        let outcome = fx.splitter.process(&submission(), &books).await?;

        assert_eq!(outcome.jobs.len(), 2);
        for job in &outcome.jobs {
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.message, "No converter found");
            assert_eq!(job.success, Some(false));
            assert!(
                job.errors
                    .iter()
                    .any(|e| e.contains("No converter was found"))
            );
        }
        assert_eq!(fx.invoker.invocation_count().unwrap(), 0);

        for index in 0..2_u32 {
            let flag = format!("unfolding/en-ulb/22f3d09f7a/{index}/finished");
            assert!(fx.artifacts.exists(&flag).await?);
        }

        let master: BuildLogDocument = get_json(
            fx.artifacts.as_ref(),
            "unfolding/en-ulb/22f3d09f7a/build_log.json",
        )
        .await?
        .unwrap();
        assert_eq!(master.status, BuildStatus::Errors);
        assert_eq!(outcome.build_log.status, BuildStatus::Errors);
        assert!(master.errors.iter().any(|e| e.starts_with("01-GEN: ")));
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_failure_fails_the_part_and_siblings_continue() -> Result<()> {
        let fx = fixture(no_wait_config());
        fx.invoker.fail_next("broker down").unwrap();
        let books = Preprocessed::Books(vec!["01-GEN".to_string(), "02-EXO".to_string()]);
        let outcome = fx.splitter.process(&submission(), &books).await?;

        let first = &outcome.jobs[0];
        assert_eq!(first.status, JobStatus::Failed);
        assert_eq!(first.message, "Conversion failed");
        assert!(
            first
                .errors
                .iter()
                .any(|e| e == "Failed to invoke converter: dispatch failed: broker down")
        );

        let second = &outcome.jobs[1];
        assert_eq!(second.status, JobStatus::Started);
        assert_eq!(fx.invoker.invocation_count().unwrap(), 2);

        assert!(
            fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/0/finished")
                .await?
        );
        assert!(
            !fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/1/finished")
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn resubmission_clears_stale_artifacts() -> Result<()> {
        let fx = fixture(no_wait_config());
        fx.artifacts
            .put(
                "unfolding/en-ulb/22f3d09f7a/5/build_log.json",
                Bytes::from_static(b"{}"),
            )
            .await?;
        fx.artifacts
            .put("unfolding/en-ulb/22f3d09f7a/finished", Bytes::new())
            .await?;

        fx.splitter
            .process(&submission(), &Preprocessed::Single)
            .await?;

        assert!(
            !fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/5/build_log.json")
                .await?
        );
        assert!(
            !fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/finished")
                .await?
        );
        assert!(
            fx.artifacts
                .exists("unfolding/en-ulb/22f3d09f7a/build_log.json")
                .await?
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn lint_timeout_records_missing_linters() -> Result<()> {
        let config = Config {
            linter_wait_timeout_secs: 2,
            ..Config::default()
        };
        let fx = fixture(config);
        let outcome = fx
            .splitter
            .process(&submission(), &Preprocessed::Single)
            .await?;

        let job = &outcome.jobs[0];
        let expected = format!("Linter didn't complete for file: {}", job.source);
        assert!(job.warnings.contains(&expected));

        let row = fx.jobs.get(job.job_id).await?.unwrap();
        assert!(row.warnings.contains(&expected));
        Ok(())
    }

    #[test]
    fn submission_decodes_with_minimal_fields() {
        let raw = serde_json::json!({
            "owner": "unfolding",
            "repo": "en-ulb",
            "commit_sha": "22f3d09f7a1b2c3d4e5f60718293a4b5c6d7e8f9",
            "user": "door-keeper",
            "resource_type": "ulb",
            "input_format": "usfm",
            "output_format": "html",
            "source": "https://git.example.org/unfolding/en-ulb/archive/master.zip"
        });
        let submission: WebhookSubmission = serde_json::from_value(raw).unwrap();
        assert_eq!(submission.options, serde_json::json!({}));
        assert!(submission.committed_by.is_none());
        assert!(submission.repo_url.is_none());
    }

    #[test]
    fn lint_failure_is_recorded_as_a_warning() {
        let mut job = sample_job();
        fold_lint_outcome(&mut job, Some(&QueueMessage::new("lint/x", false)));
        assert_eq!(job.warnings.len(), 1);
        assert!(job.warnings[0].starts_with("Linter failed for source:"));
    }

    #[test]
    fn lint_payload_warnings_are_appended() {
        let mut job = sample_job();
        let message = QueueMessage::new("lint/x", true).with_payload(serde_json::json!({
            "warnings": ["GEN 1:3 odd spacing", "GEN 2:1 missing marker"]
        }));
        fold_lint_outcome(&mut job, Some(&message));
        assert_eq!(
            job.warnings,
            vec![
                "GEN 1:3 odd spacing".to_string(),
                "GEN 2:1 missing marker".to_string()
            ]
        );
    }

    #[test]
    fn absent_lint_completion_is_recorded() {
        let mut job = sample_job();
        fold_lint_outcome(&mut job, None);
        assert_eq!(job.warnings.len(), 1);
        assert!(job.warnings[0].starts_with("Linter didn't complete for file:"));
    }
}
