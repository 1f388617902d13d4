//! Public artifact documents.
//!
//! Everything in this module is written to the artifact store as JSON and
//! read by dashboards, deployers, and later pipeline phases. Field names
//! are snake_case on the wire and must stay stable; job rows are internal
//! and free to evolve, these documents are not.
//!
//! `build_log.json` doubles as a coordination record: a commit-level
//! document carrying `build_logs` is a merged master, one without it is a
//! single part's own log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use bindery_core::JobId;

use crate::job::{Job, JobStatus};

/// Status recorded in a build log document.
///
/// Mirrors [`JobStatus`] plus `errors`, which only merged masters use: a
/// master aggregates many parts, and `errors` says the combined error list
/// is non-empty without claiming every part failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Job created, not yet dispatched.
    Requested,
    /// Dispatched to a worker.
    Started,
    /// Finished cleanly.
    Success,
    /// Finished with warnings.
    Warnings,
    /// Merged master whose combined error list is non-empty.
    Errors,
    /// Job failed outright.
    Failed,
}

impl BuildStatus {
    /// Computes the status of a merged master from its combined lists.
    #[must_use]
    pub fn from_merged_lists(errors: &[String], warnings: &[String]) -> Self {
        if !errors.is_empty() {
            Self::Errors
        } else if !warnings.is_empty() {
            Self::Warnings
        } else {
            Self::Success
        }
    }

    /// Returns true for statuses that mean the work is over.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Success | Self::Warnings | Self::Errors | Self::Failed
        )
    }
}

impl From<JobStatus> for BuildStatus {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Requested => Self::Requested,
            JobStatus::Started => Self::Started,
            JobStatus::Success => Self::Success,
            JobStatus::Warnings => Self::Warnings,
            JobStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Started => "started",
            Self::Success => "success",
            Self::Warnings => "warnings",
            Self::Errors => "errors",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The `build_log.json` document for a part or a merged master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogDocument {
    /// Composite identifier string of the job this log describes. Merged
    /// masters carry the commit triple.
    pub identifier: String,
    /// The job that produced this log.
    pub job_id: JobId,
    /// Short commit ID.
    pub commit_id: String,
    /// Repository owner.
    pub repo_owner: String,
    /// Repository name.
    pub repo_name: String,
    /// Resource type of the content.
    pub resource_type: String,
    /// Commit author, when the submission carried one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub committed_by: Option<String>,
    /// Commit message from the submission.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_message: Option<String>,
    /// Web URL of the commit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_url: Option<String>,
    /// Web URL comparing the commit against its predecessor.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub compare_url: Option<String>,
    /// Lifecycle status at the time this document was written.
    pub status: BuildStatus,
    /// Worker-reported success, null until a callback arrives.
    pub success: Option<bool>,
    /// Human-readable summary.
    pub message: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the terminal callback arrived.
    pub ended_at: Option<DateTime<Utc>>,
    /// Progress log lines.
    #[serde(default)]
    pub log: Vec<String>,
    /// Warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Errors.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Source archive URL.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source: Option<String>,
    /// Public URL of the converted output.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output: Option<String>,
    /// Bucket the converted output was written to.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cdn_bucket: Option<String>,
    /// Artifact-store prefix the converted output lives under.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cdn_file: Option<String>,
    /// Per-part logs, present only on merged masters.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_logs: Option<Vec<BuildLogDocument>>,
}

impl BuildLogDocument {
    /// Snapshots a job's current state into a document.
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        Self {
            identifier: job.identifier.to_string(),
            job_id: job.job_id,
            commit_id: job.commit.commit().to_string(),
            repo_owner: job.commit.owner().to_string(),
            repo_name: job.commit.repo().to_string(),
            resource_type: job.resource_type.clone(),
            committed_by: None,
            commit_message: None,
            commit_url: None,
            compare_url: None,
            status: job.status.into(),
            success: job.success,
            message: job.message.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
            log: job.log.clone(),
            warnings: job.warnings.clone(),
            errors: job.errors.clone(),
            source: Some(job.source.clone()),
            output: Some(job.output.clone()),
            cdn_bucket: None,
            cdn_file: Some(job.cdn_file.clone()),
            build_logs: None,
        }
    }

    /// Overlays a job's current state onto this document.
    ///
    /// Rewrites every field the job owns and leaves the rest alone, so a
    /// callback can refresh a document the splitter seeded without losing
    /// the submission metadata (`committed_by`, `commit_url`, bucket) and
    /// `build_logs` that jobs never carry.
    pub fn apply_job(&mut self, job: &Job) {
        self.identifier = job.identifier.to_string();
        self.job_id = job.job_id;
        self.commit_id = job.commit.commit().to_string();
        self.repo_owner = job.commit.owner().to_string();
        self.repo_name = job.commit.repo().to_string();
        self.resource_type = job.resource_type.clone();
        self.status = job.status.into();
        self.success = job.success;
        self.message = job.message.clone();
        self.created_at = job.created_at;
        self.started_at = job.started_at;
        self.ended_at = job.ended_at;
        self.log = job.log.clone();
        self.warnings = job.warnings.clone();
        self.errors = job.errors.clone();
        self.source = Some(job.source.clone());
        self.output = Some(job.output.clone());
        self.cdn_file = Some(job.cdn_file.clone());
    }

    /// Folds a linter's findings into this document's lists.
    ///
    /// When the linter reported before the converter, its lines are
    /// already in the job row and therefore in this document, so each
    /// line is appended only if absent. Folding the same linter log
    /// twice leaves the document unchanged.
    pub fn fold_linter(&mut self, linter: &LinterLogDocument) {
        append_missing(&mut self.log, &linter.log);
        append_missing(&mut self.warnings, &linter.warnings);
        append_missing(&mut self.errors, &linter.errors);
    }

    /// Returns true for merged master documents.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.build_logs.is_some()
    }
}

fn append_missing(target: &mut Vec<String>, lines: &[String]) {
    for line in lines {
        if !target.contains(line) {
            target.push(line.clone());
        }
    }
}

/// The `linter_log.json` document for a part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinterLogDocument {
    /// Composite identifier string of the job this lint ran for.
    pub identifier: String,
    /// Whether the linter itself ran to completion.
    pub success: bool,
    /// Progress log lines.
    #[serde(default)]
    pub log: Vec<String>,
    /// Lint warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Lint errors.
    #[serde(default)]
    pub errors: Vec<String>,
}

/// One commit's entry in a repository's `project.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Short commit ID.
    pub id: String,
    /// When the commit's build was created.
    pub created_at: DateTime<Utc>,
    /// Status of the commit's build.
    pub status: BuildStatus,
    /// Combined success across the commit's parts.
    pub success: Option<bool>,
    /// When the build was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the build finished.
    pub ended_at: Option<DateTime<Utc>>,
}

impl CommitEntry {
    /// Builds an entry from a build log document.
    #[must_use]
    pub fn from_build_log(doc: &BuildLogDocument) -> Self {
        Self {
            id: doc.commit_id.clone(),
            created_at: doc.created_at,
            status: doc.status,
            success: doc.success,
            started_at: doc.started_at,
            ended_at: doc.ended_at,
        }
    }
}

/// The per-repository `project.json` manifest listing built commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectManifest {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Source repository URL, when the submission carried one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub repo_url: Option<String>,
    /// Built commits, oldest first. One entry per commit ID.
    #[serde(default)]
    pub commits: Vec<CommitEntry>,
}

impl ProjectManifest {
    /// Creates an empty manifest for a repository.
    #[must_use]
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            repo_url: None,
            commits: Vec::new(),
        }
    }

    /// Inserts or replaces the entry for `entry.id`.
    ///
    /// Re-runs of the same commit replace their entry in place; new
    /// commits append.
    pub fn upsert_commit(&mut self, entry: CommitEntry) {
        if let Some(existing) = self.commits.iter_mut().find(|c| c.id == entry.id) {
            *existing = entry;
        } else {
            self.commits.push(entry);
        }
    }

    /// Looks up the entry for a commit ID.
    #[must_use]
    pub fn commit(&self, id: &str) -> Option<&CommitEntry> {
        self.commits.iter().find(|c| c.id == id)
    }
}
