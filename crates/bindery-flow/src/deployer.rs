//! Publication of converted output to the public site.
//!
//! The deployer runs once per `build_log.json` write to the artifact
//! store. Every invocation re-derives where the commit stands from flag
//! objects, so there is no deploy row to corrupt and re-invocation is
//! always safe:
//!
//! - the commit-level `deployed` flag, checked first and unconditionally,
//!   short-circuits everything (`SKIP`),
//! - a part document stages that part's templated pages into the commit
//!   key and writes the part's own `deployed` flag; the last part to
//!   stage falls through to the full publish,
//! - a multi-part master waits (`WAIT`) until no part lacks a build log
//!   and a `deployed` flag, then rebuilds navigation over the staged
//!   pages (`MERGE_AND_DEPLOY`),
//! - a single-part commit publishes in one pass (`DEPLOY_DIRECT`).
//!
//! A full publish ends by copying the public record forward, installing
//! the repository index redirect, and writing the commit-level `deployed`
//! flag as the provably last write: any reader that observes the flag can
//! trust every other public artifact is already in place.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use bindery_core::observability::deploy_span;
use bindery_core::paths::{BUILD_LOG_FILE, DEPLOYED_FLAG, FINISHED_FLAG, LINTER_LOG_FILE};
use bindery_core::storage::{get_json, put_json};
use bindery_core::{CommitPaths, CommitRef, Config, ObjectStore};

use crate::build_log::BuildLogDocument;
use crate::dispatch::Invoker;
use crate::error::Result;
use crate::job::Identifier;
use crate::metrics::{PipelineMetrics, time_deploy};
use crate::template::{NavIndex, StagedFile, TemplateRequest, Templater};

/// Deploy state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeployState {
    /// Request received, document not yet classified.
    New,
    /// Single-part commit publishing in one pass.
    DeployDirect,
    /// Multi-part commit with parts still unstaged.
    Wait,
    /// Multi-part commit rebuilding navigation over its staged parts.
    MergeAndDeploy,
    /// Publish finished, commit-level flag written.
    Done,
    /// Commit-level flag already present, nothing to do.
    Skip,
}

impl DeployState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Skip)
    }
}

impl std::fmt::Display for DeployState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::DeployDirect => write!(f, "DEPLOY_DIRECT"),
            Self::Wait => write!(f, "WAIT"),
            Self::MergeAndDeploy => write!(f, "MERGE_AND_DEPLOY"),
            Self::Done => write!(f, "DONE"),
            Self::Skip => write!(f, "SKIP"),
        }
    }
}

/// What one deploy invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Full publish completed and the commit-level flag is set.
    Published,
    /// One part's pages were staged; the commit publish is still pending.
    PartStaged,
    /// The commit-level flag was already present.
    AlreadyPublished,
    /// Nothing was ready to publish; no writes happened.
    NotReady,
}

impl DeployOutcome {
    /// Returns the metrics label for this outcome.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::PartStaged => "part_staged",
            Self::AlreadyPublished => "already_published",
            Self::NotReady => "not_ready",
        }
    }
}

/// Auto-refresh hook for placeholder pages of commits without output yet.
const RELOAD_SCRIPT: &str =
    "<script type=\"text/javascript\">setTimeout(function(){window.location.reload(1);}, 10000);</script>";

/// Publishes commits from the artifact store to the public site.
pub struct Deployer {
    artifacts: Arc<dyn ObjectStore>,
    site: Arc<dyn ObjectStore>,
    templater: Arc<dyn Templater>,
    invoker: Arc<dyn Invoker>,
    config: Config,
    metrics: PipelineMetrics,
}

impl Deployer {
    /// Creates a deployer over the artifact store and the public site.
    #[must_use]
    pub fn new(
        artifacts: Arc<dyn ObjectStore>,
        site: Arc<dyn ObjectStore>,
        templater: Arc<dyn Templater>,
        invoker: Arc<dyn Invoker>,
        config: Config,
    ) -> Self {
        Self {
            artifacts,
            site,
            templater,
            invoker,
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Handles one deploy trigger for the build log at `build_log_key`.
    ///
    /// A missing or unreadable document is not an error: the trigger is
    /// dropped with a warning and the commit stays in its prior state,
    /// safe to retry on the next write.
    ///
    /// # Errors
    ///
    /// Returns storage and templating errors from a deploy that was
    /// actually attempted; the commit-level flag is only written after
    /// every other publish write succeeded.
    pub async fn deploy(&self, build_log_key: &str) -> Result<DeployOutcome> {
        let _timer = time_deploy();
        let outcome = self
            .run_deploy(build_log_key)
            .instrument(deploy_span("deploy", build_log_key))
            .await?;
        self.metrics.record_deploy(outcome.as_label());
        Ok(outcome)
    }

    async fn run_deploy(&self, build_log_key: &str) -> Result<DeployOutcome> {
        let document = match get_json::<BuildLogDocument>(self.artifacts.as_ref(), build_log_key)
            .await
        {
            Ok(Some(document)) => document,
            Ok(None) => {
                tracing::warn!("no build log at the requested key");
                return Ok(DeployOutcome::NotReady);
            }
            Err(e) => {
                tracing::warn!(error = %e, "unreadable build log");
                return Ok(DeployOutcome::NotReady);
            }
        };
        let Ok(commit) = CommitRef::new(
            document.repo_owner.as_str(),
            document.repo_name.as_str(),
            document.commit_id.as_str(),
        ) else {
            tracing::warn!("build log does not name a valid commit");
            return Ok(DeployOutcome::NotReady);
        };
        let paths = commit.paths();
        tracing::debug!(state = %DeployState::New, commit = %commit, "classifying deploy trigger");

        // The global dedupe guard. Once this flag exists the commit is
        // immutable on the public site until a sweep republishes it.
        if self.artifacts.exists(&paths.deployed_flag()).await? {
            tracing::info!(state = %DeployState::Skip, commit = %commit, "commit already deployed");
            return Ok(DeployOutcome::AlreadyPublished);
        }

        match Identifier::parse(&document.identifier) {
            Ok(Identifier::Part {
                part_count,
                part_index,
                ..
            }) => {
                self.deploy_part(&document, &paths, part_count, part_index)
                    .await
            }
            Ok(Identifier::Single(_)) => {
                let parts = document.build_logs.as_ref().map_or(1, Vec::len);
                if parts > 1 {
                    let part_count = u32::try_from(parts).map_err(|_| {
                        bindery_core::Error::InvalidInput(format!(
                            "master build log claims {parts} parts"
                        ))
                    })?;
                    self.deploy_merged(&document, &paths, part_count).await
                } else {
                    self.deploy_direct(&document, &paths).await
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "unclassifiable build log identifier");
                Ok(DeployOutcome::NotReady)
            }
        }
    }

    /// Stages one part's templated pages into the commit key.
    ///
    /// Part files keep their own names, so sibling parts staging
    /// concurrently never collide. The part's navigation entries are
    /// folded into the accumulated `index.json` by key union, and the
    /// part's `deployed` flag is written last.
    ///
    /// The last part to stage completes the commit itself: once no part
    /// lacks a flag and the merged master document has landed, this pass
    /// falls through to the full publish, because no later build log
    /// write will arrive to trigger it.
    async fn deploy_part(
        &self,
        document: &BuildLogDocument,
        paths: &CommitPaths,
        part_count: u32,
        part_index: u32,
    ) -> Result<DeployOutcome> {
        if !self
            .artifacts
            .exists(&paths.part_finished_flag(part_index))
            .await?
        {
            tracing::info!(part = part_index, "part conversion has not finished");
            return Ok(DeployOutcome::NotReady);
        }

        let source = self
            .collect_files(self.artifacts.as_ref(), &paths.part_prefix(part_index))
            .await?;
        let (pages, assets): (Vec<_>, Vec<_>) = source.into_iter().partition(StagedFile::is_page);

        let mut staged = if pages.is_empty() {
            Vec::new()
        } else {
            let output = self
                .templater
                .template(TemplateRequest {
                    resource_type: document.resource_type.clone(),
                    files: pages,
                    nav: NavIndex::default(),
                    already_templated: Vec::new(),
                })
                .await?;
            let mut nav = self.read_nav(paths).await?;
            nav.union(&output.nav);
            put_json(self.site.as_ref(), &paths.index_json(), &nav).await?;
            output.files
        };
        carry_missing(&mut staged, assets);
        self.upload(&paths.prefix(), &staged).await?;

        self.artifacts
            .put(&paths.part_deployed_flag(part_index), Bytes::new())
            .await?;
        tracing::info!(part = part_index, files = staged.len(), "part output staged");

        if self.unstaged_parts(paths, part_count).await?.is_empty() {
            let master =
                get_json::<BuildLogDocument>(self.artifacts.as_ref(), &paths.build_log()).await?;
            if let Some(master) = master {
                // A pre-merge snapshot is left for the merge's own write
                // to trigger; publishing it would freeze a blank page.
                if master.build_logs.is_some() && master.status.is_terminal() {
                    return self.deploy_merged(&master, paths, part_count).await;
                }
            }
        }
        Ok(DeployOutcome::PartStaged)
    }

    /// Publishes a single-part commit in one pass.
    async fn deploy_direct(
        &self,
        document: &BuildLogDocument,
        paths: &CommitPaths,
    ) -> Result<DeployOutcome> {
        if !self.artifacts.exists(&paths.finished_flag()).await? {
            tracing::info!("conversion has not finished");
            return Ok(DeployOutcome::NotReady);
        }
        tracing::info!(state = %DeployState::DeployDirect, "publishing single-part commit");

        let source = self
            .collect_files(self.artifacts.as_ref(), &paths.prefix())
            .await?;
        let staged = self
            .publish_pages(document, paths, source, NavIndex::default(), Vec::new())
            .await?;
        self.finalize(paths).await?;
        tracing::info!(state = %DeployState::Done, files = staged, "commit published");
        Ok(DeployOutcome::Published)
    }

    /// Publishes a multi-part commit once every part has been staged.
    async fn deploy_merged(
        &self,
        document: &BuildLogDocument,
        paths: &CommitPaths,
        part_count: u32,
    ) -> Result<DeployOutcome> {
        let unstaged = self.unstaged_parts(paths, part_count).await?;
        if !unstaged.is_empty() {
            tracing::info!(
                state = %DeployState::Wait,
                unstaged = unstaged.len(),
                parts = part_count,
                "parts still unstaged"
            );
            return Ok(DeployOutcome::NotReady);
        }
        tracing::info!(state = %DeployState::MergeAndDeploy, parts = part_count, "all parts staged");

        // Navigation sidebars of pages staged early only know their own
        // part, so the whole set is rebuilt over the union index.
        let mut previous = self
            .collect_files(self.site.as_ref(), &paths.prefix())
            .await?;
        previous.retain(|f| f.name != "index.html" && f.name != "index.json");
        let nav = self.read_nav(paths).await?;
        let staged = self
            .publish_pages(document, paths, Vec::new(), nav, previous)
            .await?;
        self.finalize(paths).await?;
        tracing::info!(state = %DeployState::Done, files = staged, "commit published");
        Ok(DeployOutcome::Published)
    }

    /// Returns the indices of parts lacking a build log or a `deployed`
    /// flag, re-derived from object existence on every call.
    async fn unstaged_parts(&self, paths: &CommitPaths, part_count: u32) -> Result<Vec<u32>> {
        let mut missing = Vec::new();
        for index in 0..part_count {
            let has_log = self.artifacts.exists(&paths.part_build_log(index)).await?;
            let staged = self
                .artifacts
                .exists(&paths.part_deployed_flag(index))
                .await?;
            if !(has_log && staged) {
                missing.push(index);
            }
        }
        Ok(missing)
    }

    /// Templates and uploads the final page set for a commit-level deploy.
    ///
    /// Returns the number of files uploaded.
    async fn publish_pages(
        &self,
        document: &BuildLogDocument,
        paths: &CommitPaths,
        source: Vec<StagedFile>,
        nav: NavIndex,
        previous: Vec<StagedFile>,
    ) -> Result<usize> {
        let (mut pages, assets): (Vec<_>, Vec<_>) = source.into_iter().partition(StagedFile::is_page);
        if pages.is_empty() && !previous.iter().any(StagedFile::is_page) {
            pages.push(placeholder_page(document));
        }

        let output = self
            .templater
            .template(TemplateRequest {
                resource_type: document.resource_type.clone(),
                files: pages,
                nav,
                already_templated: previous,
            })
            .await?;

        let mut staged = output.files;
        ensure_index(&mut staged);
        carry_missing(&mut staged, assets);
        if !output.nav.is_empty() {
            put_json(self.site.as_ref(), &paths.index_json(), &output.nav).await?;
        }
        self.upload(&paths.prefix(), &staged).await?;
        Ok(staged.len())
    }

    /// Finishes a full publish: public record, repository metadata, the
    /// directory-index redirect, and the commit-level flag last.
    async fn finalize(&self, paths: &CommitPaths) -> Result<()> {
        self.publish_record(&paths.build_log(), &paths.build_log())
            .await?;
        self.publish_record(&paths.linter_log(), &paths.linter_log())
            .await?;
        self.publish_record(&paths.project_manifest(), &paths.project_manifest())
            .await?;

        match self.site.get(&paths.commit_manifest()).await {
            Ok(data) => self.site.put(&paths.repo_manifest(), data).await?,
            Err(bindery_core::Error::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.site
            .put(&paths.repo_index_html(), redirect_page(&paths.prefix()))
            .await?;

        self.artifacts
            .put(&paths.deployed_flag(), Bytes::new())
            .await?;
        Ok(())
    }

    /// Copies one artifact-store document to the site, tolerating absence.
    async fn publish_record(&self, from: &str, to: &str) -> Result<()> {
        match self.artifacts.get(from).await {
            Ok(data) => self.site.put(to, data).await?,
            Err(bindery_core::Error::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Reads the direct children of a prefix, excluding pipeline control
    /// files, sorted by name.
    async fn collect_files(&self, store: &dyn ObjectStore, prefix: &str) -> Result<Vec<StagedFile>> {
        let mut files = Vec::new();
        for meta in store.list(prefix).await? {
            let Some(name) = meta.path.strip_prefix(prefix) else {
                continue;
            };
            if name.contains('/') || is_control_file(name) {
                continue;
            }
            let content = store.get(&meta.path).await?;
            files.push(StagedFile::new(name, content));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn read_nav(&self, paths: &CommitPaths) -> Result<NavIndex> {
        Ok(get_json(self.site.as_ref(), &paths.index_json())
            .await?
            .unwrap_or_default())
    }

    async fn upload(&self, prefix: &str, files: &[StagedFile]) -> Result<()> {
        for file in files {
            self.site
                .put(&format!("{prefix}{}", file.name), file.content.clone())
                .await?;
        }
        Ok(())
    }

    /// Re-triggers deploys for commits whose build log is older than the
    /// configured freshness window.
    ///
    /// Rolls a new page template out to the whole site without touching
    /// recently deployed commits. Returns the number of commits requeued;
    /// a commit whose re-trigger fails to dispatch is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error when the artifact store cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.config.sweep_max_age();
        let mut requeued = 0_u64;
        for meta in self.artifacts.list("").await? {
            if CommitRef::from_build_log_key(&meta.path).is_none() {
                continue;
            }
            if meta.last_modified.is_some_and(|modified| modified >= cutoff) {
                continue;
            }
            let payload = serde_json::json!({ "build_log_key": meta.path });
            match self.invoker.invoke(&self.config.deploy_function, payload).await {
                Ok(()) => requeued += 1,
                Err(e) => {
                    tracing::warn!(key = %meta.path, error = %e, "requeueing deploy failed");
                }
            }
        }
        self.metrics.record_sweep_requeued(requeued);
        tracing::info!(requeued, "deploy sweep finished");
        Ok(requeued)
    }
}

/// Returns true for pipeline coordination files that are not content.
fn is_control_file(name: &str) -> bool {
    matches!(
        name,
        BUILD_LOG_FILE | LINTER_LOG_FILE | FINISHED_FLAG | DEPLOYED_FLAG
    )
}

/// Appends every file whose name is not already staged.
fn carry_missing(staged: &mut Vec<StagedFile>, extra: Vec<StagedFile>) {
    for file in extra {
        if staged.iter().all(|s| s.name != file.name) {
            staged.push(file);
        }
    }
}

/// Installs the first page as `index.html` when no page claimed the name.
fn ensure_index(staged: &mut Vec<StagedFile>) {
    if staged.iter().any(|f| f.name == "index.html") {
        return;
    }
    let Some(first) = staged.iter().find(|f| f.is_page()) else {
        return;
    };
    let content = first.content.clone();
    staged.push(StagedFile::new("index.html", content));
}

/// Synthesizes the page shown when a commit has no convertible output,
/// surfacing recorded errors, warnings, or the current status message.
fn placeholder_page(document: &BuildLogDocument) -> StagedFile {
    let mut content = String::new();
    if !document.errors.is_empty() {
        content.push_str("<h2>Critical!</h2>\n<h3>Here is what went wrong with this build:</h3>\n");
        push_list(&mut content, &document.errors);
    } else if !document.warnings.is_empty() {
        content.push_str("<h2>Warning!</h2>\n<h3>Here are some problems with this build:</h3>\n");
        push_list(&mut content, &document.warnings);
    } else {
        content.push_str(&format!("<h1>{}</h1>\n", document.message));
        content.push_str(&format!(
            "<p><i>No content is available to show for {} yet.</i></p>\n",
            document.repo_name
        ));
        content.push_str(RELOAD_SCRIPT);
        content.push('\n');
    }
    let html = format!(
        "<html lang=\"en\">\n<head><title>{}</title></head>\n<body><div id=\"content\">\n{content}</div></body>\n</html>\n",
        document.repo_name
    );
    StagedFile::new("index.html", html)
}

fn push_list(content: &mut String, lines: &[String]) {
    content.push_str("<ul>\n");
    for line in lines {
        content.push_str(&format!("<li>{line}</li>\n"));
    }
    content.push_str("</ul>\n");
}

/// Builds the repository directory-index page redirecting to a commit.
fn redirect_page(commit_prefix: &str) -> Bytes {
    Bytes::from(format!(
        "<html><head><meta http-equiv=\"refresh\" content=\"0; url=/{commit_prefix}\" /></head></html>\n"
    ))
}
