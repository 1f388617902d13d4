//! Typed storage keys for pipeline artifacts.
//!
//! Every artifact a commit produces lives under one prefix in the artifact
//! store:
//!
//! ```text
//! <owner>/<repo>/<commit>/build_log.json              commit-level build log
//! <owner>/<repo>/<commit>/<part>/build_log.json       part build log
//! <owner>/<repo>/<commit>[/<part>]/linter_log.json    sibling linter document
//! <owner>/<repo>/<commit>[/<part>]/finished           part completion flag
//! <owner>/<repo>/<commit>[/<part>]/deployed           deploy flags
//! <owner>/<repo>/project.json                         repository manifest
//! ```
//!
//! [`CommitRef`] is the validated identity of a pushed commit; [`CommitPaths`]
//! derives every key from it so callers never format keys by hand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::id::JobId;

/// File name of the commit- and part-level build log document.
pub const BUILD_LOG_FILE: &str = "build_log.json";
/// File name of the sibling linter-origin document.
pub const LINTER_LOG_FILE: &str = "linter_log.json";
/// File name of the zero-content part completion flag.
pub const FINISHED_FLAG: &str = "finished";
/// File name of the zero-content deployed flags.
pub const DEPLOYED_FLAG: &str = "deployed";
/// Commit ids are shortened to this many characters in storage keys.
pub const SHORT_COMMIT_LEN: usize = 10;

/// The validated `(owner, repo, commit)` identity of a pushed commit.
///
/// Displays as `owner/repo/commit`, the composite form used in single-part
/// job identifiers and storage prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitRef {
    owner: String,
    repo: String,
    commit: String,
}

impl CommitRef {
    /// Creates a commit reference from already-short segments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when any segment is empty, contains a
    /// path separator or control character, or is a traversal component.
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        commit: impl Into<String>,
    ) -> Result<Self> {
        let owner = validate_segment("owner", owner.into())?;
        let repo = validate_segment("repo", repo.into())?;
        let commit = validate_segment("commit", commit.into())?;
        Ok(Self {
            owner,
            repo,
            commit,
        })
    }

    /// Creates a commit reference from a full commit sha, shortening it to
    /// the [`SHORT_COMMIT_LEN`]-character form used in keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when a segment fails validation.
    pub fn from_long_sha(
        owner: impl Into<String>,
        repo: impl Into<String>,
        sha: &str,
    ) -> Result<Self> {
        let short = sha.get(..SHORT_COMMIT_LEN).unwrap_or(sha);
        Self::new(owner, repo, short)
    }

    /// Parses the commit reference out of a commit-level build log key,
    /// returning `None` for keys at any other depth or file name.
    #[must_use]
    pub fn from_build_log_key(key: &str) -> Option<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        match segments.as_slice() {
            [owner, repo, commit, BUILD_LOG_FILE] => Self::new(*owner, *repo, *commit).ok(),
            _ => None,
        }
    }

    /// Returns the repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the repository name.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Returns the short commit id.
    #[must_use]
    pub fn commit(&self) -> &str {
        &self.commit
    }

    /// Returns the typed key derivations for this commit.
    #[must_use]
    pub fn paths(&self) -> CommitPaths {
        CommitPaths::new(self.clone())
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.repo, self.commit)
    }
}

impl FromStr for CommitRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split('/').collect();
        let [owner, repo, commit] = segments.as_slice() else {
            return Err(Error::Validation {
                message: format!("commit reference '{s}' must have exactly three segments"),
            });
        };
        Self::new(*owner, *repo, *commit)
    }
}

/// Typed artifact keys for a single commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPaths {
    commit: CommitRef,
}

impl CommitPaths {
    /// Creates typed paths for `commit`.
    #[must_use]
    pub fn new(commit: CommitRef) -> Self {
        Self { commit }
    }

    /// Returns the commit this derives keys for.
    #[must_use]
    pub fn commit(&self) -> &CommitRef {
        &self.commit
    }

    /// Returns the commit-level key prefix, with trailing slash.
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}/", self.commit)
    }

    /// Returns the key prefix of one part, with trailing slash.
    #[must_use]
    pub fn part_prefix(&self, part_index: u32) -> String {
        format!("{}/{part_index}/", self.commit)
    }

    /// Returns the commit-level build log key.
    #[must_use]
    pub fn build_log(&self) -> String {
        format!("{}/{BUILD_LOG_FILE}", self.commit)
    }

    /// Returns one part's build log key.
    #[must_use]
    pub fn part_build_log(&self, part_index: u32) -> String {
        format!("{}/{part_index}/{BUILD_LOG_FILE}", self.commit)
    }

    /// Returns the commit-level linter document key.
    #[must_use]
    pub fn linter_log(&self) -> String {
        format!("{}/{LINTER_LOG_FILE}", self.commit)
    }

    /// Returns one part's linter document key.
    #[must_use]
    pub fn part_linter_log(&self, part_index: u32) -> String {
        format!("{}/{part_index}/{LINTER_LOG_FILE}", self.commit)
    }

    /// Returns the commit-level completion flag key (single-part commits).
    #[must_use]
    pub fn finished_flag(&self) -> String {
        format!("{}/{FINISHED_FLAG}", self.commit)
    }

    /// Returns one part's completion flag key.
    #[must_use]
    pub fn part_finished_flag(&self, part_index: u32) -> String {
        format!("{}/{part_index}/{FINISHED_FLAG}", self.commit)
    }

    /// Returns the commit-level deployed flag key, the final idempotency
    /// barrier of a deploy.
    #[must_use]
    pub fn deployed_flag(&self) -> String {
        format!("{}/{DEPLOYED_FLAG}", self.commit)
    }

    /// Returns one part's deployed flag key.
    #[must_use]
    pub fn part_deployed_flag(&self, part_index: u32) -> String {
        format!("{}/{part_index}/{DEPLOYED_FLAG}", self.commit)
    }

    /// Returns the published page-set index key.
    #[must_use]
    pub fn index_html(&self) -> String {
        format!("{}/index.html", self.commit)
    }

    /// Returns the navigation index key.
    #[must_use]
    pub fn index_json(&self) -> String {
        format!("{}/index.json", self.commit)
    }

    /// Returns the commit-level resource manifest key.
    #[must_use]
    pub fn commit_manifest(&self) -> String {
        format!("{}/manifest.json", self.commit)
    }

    /// Returns the repository key prefix, with trailing slash.
    #[must_use]
    pub fn repo_prefix(&self) -> String {
        format!("{}/{}/", self.commit.owner, self.commit.repo)
    }

    /// Returns the repository manifest key.
    #[must_use]
    pub fn project_manifest(&self) -> String {
        format!("{}/{}/project.json", self.commit.owner, self.commit.repo)
    }

    /// Returns the repository-level resource manifest key.
    #[must_use]
    pub fn repo_manifest(&self) -> String {
        format!("{}/{}/manifest.json", self.commit.owner, self.commit.repo)
    }

    /// Returns the repository directory-index key that redirects to the
    /// latest deployed commit.
    #[must_use]
    pub fn repo_index_html(&self) -> String {
        format!("{}/{}/index.html", self.commit.owner, self.commit.repo)
    }
}

/// Returns the artifact-store prefix a worker leaves its converted output
/// under for one job.
#[must_use]
pub fn job_output_prefix(job_id: JobId) -> String {
    format!("jobs/{job_id}/output/")
}

fn validate_segment(name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::Validation {
            message: format!("{name} must not be empty"),
        });
    }
    if value.contains('/') || value.contains('\\') {
        return Err(Error::Validation {
            message: format!("{name} must not contain path separators"),
        });
    }
    if value.contains('\n') || value.contains('\r') || value.contains('\0') {
        return Err(Error::Validation {
            message: format!("{name} must not contain control characters"),
        });
    }
    if value == "." || value == ".." {
        return Err(Error::Validation {
            message: format!("{name} must not be a traversal component"),
        });
    }
    Ok(value)
}
