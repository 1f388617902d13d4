//! Commit-level completion merge.
//!
//! Every part callback finishes by invoking this merge, and the splitter
//! invokes it once more when a part fails before dispatch. The merge counts
//! `finished` flags under the commit prefix; until every expected flag is
//! present it returns [`MergeOutcome::Incomplete`] with no side effects.
//! Once all parts have reported it folds the per-part documents into the
//! commit-level `build_log.json` and refreshes the repository manifest.
//!
//! The flag check and the write are not atomic, so callbacks finishing
//! near-simultaneously can each run a full merge. That is safe: the merge
//! is a pure function of the per-part documents, and redundant runs write
//! byte-identical output. Job rows are never touched here.

use std::collections::HashSet;
use std::sync::Arc;

use bindery_core::storage::{get_json, put_json};
use bindery_core::{CommitRef, ObjectStore};

use crate::build_log::{
    BuildLogDocument, BuildStatus, CommitEntry, LinterLogDocument, ProjectManifest,
};
use crate::error::Result;
use crate::job::Identifier;
use crate::metrics::PipelineMetrics;

/// Result of a merge attempt.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Not every part has reported yet; nothing was written.
    Incomplete {
        /// Completion flags currently present.
        present: u32,
        /// Parts expected to report.
        expected: u32,
    },
    /// All parts reported; the merged master document was written.
    Merged(BuildLogDocument),
}

impl MergeOutcome {
    /// Returns the merged master document, if the merge completed.
    #[must_use]
    pub fn merged(&self) -> Option<&BuildLogDocument> {
        match self {
            Self::Incomplete { .. } => None,
            Self::Merged(master) => Some(master),
        }
    }
}

/// Folds per-part build logs into the commit-level document once every
/// part's completion flag exists.
pub struct CompletionMerge {
    artifacts: Arc<dyn ObjectStore>,
    metrics: PipelineMetrics,
}

impl CompletionMerge {
    /// Creates a merge over the artifact store.
    #[must_use]
    pub fn new(artifacts: Arc<dyn ObjectStore>) -> Self {
        Self {
            artifacts,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Merges the commit's parts if they have all reported.
    ///
    /// Safe to call redundantly: short of all `part_count` completion
    /// flags it is a read-only no-op, and with all flags present it
    /// rewrites the same bytes.
    ///
    /// # Errors
    ///
    /// Returns storage and serialization errors as-is. An incomplete
    /// commit is an ordinary [`MergeOutcome`], not an error.
    pub async fn check_and_merge(
        &self,
        commit: &CommitRef,
        part_count: u32,
    ) -> Result<MergeOutcome> {
        let paths = commit.paths();

        let listed = self.artifacts.list(&paths.prefix()).await?;
        let keys: HashSet<String> = listed.into_iter().map(|meta| meta.path).collect();

        let expected_flags: Vec<String> = if part_count == 1 {
            vec![paths.finished_flag()]
        } else {
            (0..part_count).map(|i| paths.part_finished_flag(i)).collect()
        };
        let mut present = 0;
        for flag in &expected_flags {
            if keys.contains(flag) {
                present += 1;
            }
        }
        if present < part_count {
            tracing::debug!(commit = %commit, present, expected = part_count, "merge incomplete");
            self.metrics.record_merge("incomplete");
            return Ok(MergeOutcome::Incomplete {
                present,
                expected: part_count,
            });
        }

        let Some(raw_parts) = self.read_part_documents(commit, part_count).await? else {
            tracing::warn!(commit = %commit, "all parts flagged but a build log is missing");
            self.metrics.record_merge("incomplete");
            return Ok(MergeOutcome::Incomplete {
                present,
                expected: part_count,
            });
        };

        let folded = self
            .fold_linter_documents(commit, raw_parts.clone(), part_count)
            .await?;
        let master = merge_documents(commit, &folded, raw_parts);

        put_json(self.artifacts.as_ref(), &paths.build_log(), &master).await?;
        self.update_project_manifest(commit, &master).await?;

        tracing::info!(commit = %commit, status = %master.status, "merged commit build log");
        self.metrics.record_merge("merged");
        Ok(MergeOutcome::Merged(master))
    }

    /// Reads the raw per-part documents in index order, returning `None`
    /// when any is missing despite its flag (a consistency window).
    async fn read_part_documents(
        &self,
        commit: &CommitRef,
        part_count: u32,
    ) -> Result<Option<Vec<BuildLogDocument>>> {
        let paths = commit.paths();
        let mut parts = Vec::with_capacity(part_count as usize);

        if part_count == 1 {
            let Some(doc) =
                get_json::<BuildLogDocument>(self.artifacts.as_ref(), &paths.build_log()).await?
            else {
                return Ok(None);
            };
            // A previous merge overwrote the part document at this same
            // key; the original is what it attached under build_logs.
            let raw = match doc.build_logs {
                Some(mut logs) if !logs.is_empty() => logs.remove(0),
                _ => doc,
            };
            parts.push(raw);
            return Ok(Some(parts));
        }

        for index in 0..part_count {
            let key = paths.part_build_log(index);
            let Some(doc) = get_json::<BuildLogDocument>(self.artifacts.as_ref(), &key).await?
            else {
                return Ok(None);
            };
            parts.push(doc);
        }
        Ok(Some(parts))
    }

    /// Folds each part's sibling linter document into its build log.
    async fn fold_linter_documents(
        &self,
        commit: &CommitRef,
        mut parts: Vec<BuildLogDocument>,
        part_count: u32,
    ) -> Result<Vec<BuildLogDocument>> {
        let paths = commit.paths();
        for (index, part) in (0_u32..).zip(parts.iter_mut()) {
            let key = if part_count == 1 {
                paths.linter_log()
            } else {
                paths.part_linter_log(index)
            };
            if let Some(linter) =
                get_json::<LinterLogDocument>(self.artifacts.as_ref(), &key).await?
            {
                part.fold_linter(&linter);
            }
        }
        Ok(parts)
    }

    /// Inserts or refreshes the merged commit's entry in `project.json`.
    async fn update_project_manifest(
        &self,
        commit: &CommitRef,
        master: &BuildLogDocument,
    ) -> Result<()> {
        let key = commit.paths().project_manifest();
        let mut manifest = get_json::<ProjectManifest>(self.artifacts.as_ref(), &key)
            .await?
            .unwrap_or_else(|| ProjectManifest::new(commit.owner(), commit.repo()));
        manifest.upsert_commit(CommitEntry::from_build_log(master));
        put_json(self.artifacts.as_ref(), &key, &manifest).await?;
        Ok(())
    }
}

/// Merges folded part documents into the commit-level master.
///
/// Pure: depends only on its inputs, so redundant merges of the same
/// parts produce identical documents.
fn merge_documents(
    commit: &CommitRef,
    folded: &[BuildLogDocument],
    raw: Vec<BuildLogDocument>,
) -> BuildLogDocument {
    let mut master = folded[0].clone();

    let mut log = Vec::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut success = true;
    let mut ended_at = None;

    for part in folded {
        let label = merge_label(part);
        for line in &part.log {
            log.push(format!("{label}: {line}"));
        }
        for line in &part.warnings {
            warnings.push(format!("{label}: {line}"));
        }
        for line in &part.errors {
            errors.push(format!("{label}: {line}"));
        }
        success &= part.success.unwrap_or(false);
        if part.ended_at > ended_at {
            ended_at = part.ended_at;
        }
    }

    master.identifier = commit.to_string();
    master.status = BuildStatus::from_merged_lists(&errors, &warnings);
    master.success = Some(success);
    master.message = match master.status {
        BuildStatus::Errors => "Conversion failed",
        BuildStatus::Warnings => "Conversion successful with warnings",
        _ => "Conversion successful",
    }
    .to_string();
    master.log = log;
    master.warnings = warnings;
    master.errors = errors;
    master.ended_at = ended_at;
    master.build_logs = Some(raw);
    master
}

/// The prefix a part's merged messages carry: the book for multi-part
/// jobs, the commit id otherwise.
fn merge_label(part: &BuildLogDocument) -> String {
    match Identifier::parse(&part.identifier) {
        Ok(Identifier::Part { book, .. }) => book,
        _ => part.commit_id.clone(),
    }
}
