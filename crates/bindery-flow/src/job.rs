//! Conversion jobs and their lifecycle.
//!
//! A [`Job`] is one unit of conversion work: a whole repository for
//! single-part submissions, or one book of it for multi-part submissions.
//! Its [`Identifier`] is the composite key that rides through worker
//! dispatch and comes back in callbacks:
//!
//! - `owner/repo/commit` for a single-part job
//! - `jobid/partCount/partIndex/bookName` for one part of a split submission
//!
//! The length of the split determines the shape; nothing else does.
//!
//! ## Lifecycle
//!
//! ```text
//! requested -> started -> success
//!                      -> warnings
//!                      -> failed
//! ```
//!
//! A status may only move forward in the ordering
//! `requested < started < success < warnings < failed`: late linter results
//! can worsen a finished job from success to warnings, but nothing ever
//! moves a status backward. Job rows are persisted whole; the last writer
//! wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use bindery_core::{CommitPaths, CommitRef, JobId};

use crate::error::{Error, Result};

/// How long after creation a job is considered abandoned.
const EXPIRES_AFTER_DAYS: i64 = 1;
/// Advertised time to first progress, used for dashboards and stale sweeps.
const ETA_SECONDS: i64 = 20;

/// The lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and persisted, not yet dispatched.
    #[default]
    Requested,
    /// Dispatched to a converter worker.
    Started,
    /// Converted cleanly.
    Success,
    /// Converted, but with recorded warnings.
    Warnings,
    /// Conversion failed or produced errors.
    Failed,
}

impl JobStatus {
    /// Returns true if this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Warnings | Self::Failed)
    }

    /// Returns whether a transition to `target` is allowed.
    ///
    /// The ordering is monotonic: equal targets are allowed (replayed
    /// callbacks are harmless), backward moves never are.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        target.rank() >= self.rank()
    }

    /// Returns the worse of two statuses under the lifecycle ordering.
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::Started => 1,
            Self::Success => 2,
            Self::Warnings => 3,
            Self::Failed => 4,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Started => "started",
            Self::Success => "success",
            Self::Warnings => "warnings",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// The composite key identifying a job across dispatch and callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Identifier {
    /// A single-part job, identified by its commit triple.
    Single(CommitRef),
    /// One part of a multi-part job.
    Part {
        /// The part's own job ID.
        job_id: JobId,
        /// Total number of parts in the split.
        part_count: u32,
        /// This part's index, `0..part_count`.
        part_index: u32,
        /// The book this part converts.
        book: String,
    },
}

impl Identifier {
    /// Parses an identifier, determining the shape by segment count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedIdentifier`] for anything that is not a
    /// valid 3-segment commit triple or 4-segment part key.
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        match segments.as_slice() {
            [owner, repo, commit] => {
                let commit = CommitRef::new(*owner, *repo, *commit)
                    .map_err(|e| Error::malformed_identifier(s, e.to_string()))?;
                Ok(Self::Single(commit))
            }
            [job_id, part_count, part_index, book] => {
                let job_id = JobId::from_str(job_id)
                    .map_err(|e| Error::malformed_identifier(s, e.to_string()))?;
                let part_count: u32 = part_count.parse().map_err(|_| {
                    Error::malformed_identifier(s, format!("part count '{part_count}' is not a number"))
                })?;
                let part_index: u32 = part_index.parse().map_err(|_| {
                    Error::malformed_identifier(s, format!("part index '{part_index}' is not a number"))
                })?;
                if part_count == 0 {
                    return Err(Error::malformed_identifier(s, "part count must be positive"));
                }
                if part_index >= part_count {
                    return Err(Error::malformed_identifier(
                        s,
                        format!("part index {part_index} out of range 0..{part_count}"),
                    ));
                }
                if book.is_empty() {
                    return Err(Error::malformed_identifier(s, "book name is empty"));
                }
                Ok(Self::Part {
                    job_id,
                    part_count,
                    part_index,
                    book: (*book).to_string(),
                })
            }
            _ => Err(Error::malformed_identifier(
                s,
                format!("expected 3 or 4 segments, got {}", segments.len()),
            )),
        }
    }

    /// Returns true for the part shape.
    #[must_use]
    pub const fn is_part(&self) -> bool {
        matches!(self, Self::Part { .. })
    }

    /// Returns the number of parts this identifier implies (1 for single).
    #[must_use]
    pub const fn part_count(&self) -> u32 {
        match self {
            Self::Single(_) => 1,
            Self::Part { part_count, .. } => *part_count,
        }
    }

    /// Returns the part index, or `None` for the single shape.
    #[must_use]
    pub const fn part_index(&self) -> Option<u32> {
        match self {
            Self::Single(_) => None,
            Self::Part { part_index, .. } => Some(*part_index),
        }
    }

    /// Returns the book name, or `None` for the single shape.
    #[must_use]
    pub fn book(&self) -> Option<&str> {
        match self {
            Self::Single(_) => None,
            Self::Part { book, .. } => Some(book),
        }
    }

    /// Returns the prefix merged messages from this part are labeled with:
    /// the book name for parts, the commit id for single jobs.
    #[must_use]
    pub fn message_prefix<'a>(&'a self, commit: &'a CommitRef) -> &'a str {
        match self {
            Self::Single(_) => commit.commit(),
            Self::Part { book, .. } => book,
        }
    }

    /// Returns this job's build log key: the part key for part jobs, the
    /// commit-level key otherwise.
    #[must_use]
    pub fn build_log_key(&self, paths: &CommitPaths) -> String {
        match self.part_index() {
            Some(index) => paths.part_build_log(index),
            None => paths.build_log(),
        }
    }

    /// Returns this job's linter document key.
    #[must_use]
    pub fn linter_log_key(&self, paths: &CommitPaths) -> String {
        match self.part_index() {
            Some(index) => paths.part_linter_log(index),
            None => paths.linter_log(),
        }
    }

    /// Returns this job's completion flag key.
    #[must_use]
    pub fn finished_flag_key(&self, paths: &CommitPaths) -> String {
        match self.part_index() {
            Some(index) => paths.part_finished_flag(index),
            None => paths.finished_flag(),
        }
    }

    /// Returns the artifact prefix this job's published files live under.
    #[must_use]
    pub fn artifact_prefix(&self, paths: &CommitPaths) -> String {
        match self.part_index() {
            Some(index) => paths.part_prefix(index),
            None => paths.prefix(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(commit) => write!(f, "{commit}"),
            Self::Part {
                job_id,
                part_count,
                part_index,
                book,
            } => write!(f, "{job_id}/{part_count}/{part_index}/{book}"),
        }
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        identifier.to_string()
    }
}

impl TryFrom<String> for Identifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

/// A hypermedia link attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Link target.
    pub href: String,
    /// Relation to the job (`self`, etc).
    pub rel: String,
    /// HTTP method the link responds to.
    pub method: String,
}

impl Link {
    /// Builds the self link for a job ID under an API base URL.
    #[must_use]
    pub fn self_link(api_url: &str, job_id: JobId) -> Self {
        Self {
            href: format!("{api_url}/job/{job_id}"),
            rel: "self".to_string(),
            method: "GET".to_string(),
        }
    }
}

/// One unit of conversion work.
///
/// Rows are persisted whole through [`crate::store::JobStore`]; concurrent
/// writers race benignly because each part of a commit has exactly one
/// writer per phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID; part identifiers embed it as their first segment.
    pub job_id: JobId,
    /// The composite dispatch/callback key.
    pub identifier: Identifier,
    /// The commit this job belongs to. Sibling parts share it.
    pub commit: CommitRef,
    /// User the submission ran as.
    pub user: String,
    /// Resource type of the repository content (e.g. `ulb`, `obs`).
    pub resource_type: String,
    /// Format the source arrives in (e.g. `usfm`, `md`).
    pub input_format: String,
    /// Format the converter must produce (e.g. `html`).
    pub output_format: String,
    /// Source archive URL, with a per-book selector for parts.
    pub source: String,
    /// Public URL of the converted output.
    pub output: String,
    /// Artifact-store prefix the worker writes converted output under.
    pub cdn_file: String,
    /// Converter module chosen for this job, if one matched.
    pub convert_module: Option<String>,
    /// Linter module chosen for this job, if one is registered.
    pub lint_module: Option<String>,
    /// Converter options passed through to the worker.
    #[serde(default)]
    pub options: serde_json::Value,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Worker-reported success, unset until a callback arrives.
    pub success: Option<bool>,
    /// Human-readable summary matching the status.
    pub message: String,
    /// When the job row was created.
    pub created_at: DateTime<Utc>,
    /// When the job was dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// When the terminal callback arrived.
    pub ended_at: Option<DateTime<Utc>>,
    /// When the job is considered abandoned.
    pub expires_at: DateTime<Utc>,
    /// Advertised time to first progress.
    pub eta: DateTime<Utc>,
    /// Append-only progress log.
    #[serde(default)]
    pub log: Vec<String>,
    /// Append-only warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Append-only errors.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Hypermedia links (self).
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Job {
    /// Creates a job in the `requested` state with default timestamps.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: JobId,
        identifier: Identifier,
        commit: CommitRef,
        user: impl Into<String>,
        resource_type: impl Into<String>,
        input_format: impl Into<String>,
        output_format: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            job_id,
            identifier,
            commit,
            user: user.into(),
            resource_type: resource_type.into(),
            input_format: input_format.into(),
            output_format: output_format.into(),
            source: source.into(),
            output: String::new(),
            cdn_file: String::new(),
            convert_module: None,
            lint_module: None,
            options: serde_json::Value::Object(serde_json::Map::new()),
            status: JobStatus::Requested,
            success: None,
            message: "Conversion requested".to_string(),
            created_at,
            started_at: None,
            ended_at: None,
            expires_at: created_at + chrono::Duration::days(EXPIRES_AFTER_DAYS),
            eta: created_at + chrono::Duration::seconds(ETA_SECONDS),
            log: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Transitions the job to `target`, stamping lifecycle timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] when the target would move
    /// the status backward.
    #[tracing::instrument(skip(self), fields(job_id = %self.job_id, from = %self.status, to = %target))]
    pub fn transition_to(&mut self, target: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: "status may only move forward".to_string(),
            });
        }

        if matches!(target, JobStatus::Started) {
            self.started_at.get_or_insert_with(Utc::now);
        }
        if target.is_terminal() {
            self.ended_at.get_or_insert_with(Utc::now);
        }
        self.status = target;
        Ok(())
    }

    /// Appends to the progress log and emits a debug event.
    pub fn log_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job_id = %self.job_id, "{message}");
        self.log.push(message);
    }

    /// Appends a warning and emits a warn event.
    pub fn warning_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(job_id = %self.job_id, "{message}");
        self.warnings.push(message);
    }

    /// Appends an error and emits an error event.
    pub fn error_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(job_id = %self.job_id, "{message}");
        self.errors.push(message);
    }
}
