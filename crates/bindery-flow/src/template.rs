//! Templating collaborator contract.
//!
//! Converted output is raw HTML fragments; turning them into a navigable
//! page set is the job of an external templating service invoked by the
//! deployer. This module defines the exchange types, the [`Templater`]
//! trait the deployer is written against, and an in-memory implementation
//! for tests.
//!
//! Navigation data accumulates across deploy passes in a [`NavIndex`]:
//! title/chapter/book-code maps keyed per output file. Each pass of a
//! multi-part commit contributes its own entries, and the maps merge by
//! plain key union since sibling parts never produce the same file name.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One file staged for templating or publication.
///
/// `name` is relative to the commit key on the public site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// File name, e.g. `01-GEN.html`.
    pub name: String,
    /// File content.
    pub content: Bytes,
}

impl StagedFile {
    /// Creates a staged file.
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Returns true for page files the templater wraps.
    #[must_use]
    pub fn is_page(&self) -> bool {
        self.name.ends_with(".html")
    }
}

/// Navigation maps for a templated page set, keyed per output file.
///
/// Persisted as `index.json` next to the published pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavIndex {
    /// Page title per file.
    #[serde(default)]
    pub titles: BTreeMap<String, String>,
    /// Chapter anchors per file.
    #[serde(default)]
    pub chapters: BTreeMap<String, Vec<String>>,
    /// Book code per file.
    #[serde(default)]
    pub book_codes: BTreeMap<String, String>,
}

impl NavIndex {
    /// Merges another index into this one by key union.
    ///
    /// Parts of one commit never share file names, so collisions only
    /// happen when the same file is re-templated; the newer entry wins.
    pub fn union(&mut self, other: &Self) {
        self.titles
            .extend(other.titles.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.chapters
            .extend(other.chapters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.book_codes
            .extend(other.book_codes.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Returns true when no map has any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty() && self.chapters.is_empty() && self.book_codes.is_empty()
    }
}

/// One templating request.
#[derive(Debug, Clone)]
pub struct TemplateRequest {
    /// Resource type selecting the template (e.g. `ulb`, `obs`).
    pub resource_type: String,
    /// Raw page files to wrap.
    pub files: Vec<StagedFile>,
    /// Navigation entries accumulated by earlier passes.
    pub nav: NavIndex,
    /// Pages templated by an earlier pass, carried so their navigation
    /// can be rebuilt without re-wrapping the content.
    pub already_templated: Vec<StagedFile>,
}

/// A templated page set.
#[derive(Debug, Clone)]
pub struct TemplateOutput {
    /// Every page of the set, wrapped plus rebuilt.
    pub files: Vec<StagedFile>,
    /// Navigation maps covering every page the templater saw.
    pub nav: NavIndex,
}

/// Wraps raw page files in the public site template.
///
/// Implementations run out of process in production; the deployer only
/// depends on this trait.
#[async_trait]
pub trait Templater: Send + Sync + 'static {
    /// Produces the final page set for one deploy pass.
    ///
    /// # Errors
    ///
    /// Returns an error when the page set cannot be produced; the caller
    /// leaves the commit in its prior state and retries on the next
    /// triggering event.
    async fn template(&self, request: TemplateRequest) -> Result<TemplateOutput>;
}

#[derive(Debug, Default)]
struct TemplaterState {
    requests: Vec<TemplateRequest>,
    failures: std::collections::VecDeque<String>,
}

/// Recording templater for tests.
///
/// Wraps each page in a minimal shell carrying the resource type, records
/// a title per page, and passes already-templated pages through untouched.
#[derive(Debug, Default)]
pub struct MemoryTemplater {
    state: RwLock<TemplaterState>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("templater lock poisoned")
}

impl MemoryTemplater {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for the next `template` call.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn fail_next(&self, message: impl Into<String>) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.failures.push_back(message.into());
        drop(state);
        Ok(())
    }

    /// Returns a copy of every recorded request.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn requests(&self) -> Result<Vec<TemplateRequest>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.requests.clone())
    }

    /// Returns the number of recorded requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn request_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.requests.len())
    }
}

#[async_trait]
impl Templater for MemoryTemplater {
    async fn template(&self, request: TemplateRequest) -> Result<TemplateOutput> {
        let mut state = self.state.write().map_err(poison_err)?;
        if let Some(message) = state.failures.pop_front() {
            drop(state);
            return Err(Error::storage(message));
        }
        state.requests.push(request.clone());
        drop(state);

        let mut nav = request.nav.clone();
        let mut files = Vec::with_capacity(request.files.len() + request.already_templated.len());
        for file in &request.files {
            let body = String::from_utf8_lossy(&file.content);
            let title = extract_title(&body).unwrap_or_else(|| title_from_name(&file.name));
            nav.titles.insert(file.name.clone(), title);
            let wrapped = format!(
                "<html><body class=\"{}\"><div id=\"content\">{body}</div></body></html>",
                request.resource_type
            );
            files.push(StagedFile::new(file.name.as_str(), wrapped));
        }
        files.extend(request.already_templated.iter().cloned());
        Ok(TemplateOutput { files, nav })
    }
}

/// Pulls the first `<h1>` heading out of a page body.
fn extract_title(body: &str) -> Option<String> {
    let start = body.find("<h1>")? + "<h1>".len();
    let end = body[start..].find("</h1>")? + start;
    let title = body[start..end].trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Falls back to the file stem when a page carries no heading.
fn title_from_name(name: &str) -> String {
    name.strip_suffix(".html").unwrap_or(name).replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nav_with_title(file: &str, title: &str) -> NavIndex {
        let mut nav = NavIndex::default();
        nav.titles.insert(file.to_string(), title.to_string());
        nav
    }

    #[test]
    fn union_merges_maps_per_file() {
        let mut nav = nav_with_title("01-GEN.html", "Genesis");
        nav.chapters
            .insert("01-GEN.html".to_string(), vec!["gen-1".to_string()]);
        nav.book_codes
            .insert("01-GEN.html".to_string(), "gen".to_string());

        let mut other = nav_with_title("02-EXO.html", "Exodus");
        other
            .chapters
            .insert("02-EXO.html".to_string(), vec!["exo-1".to_string()]);

        nav.union(&other);
        assert_eq!(nav.titles.len(), 2);
        assert_eq!(nav.titles["02-EXO.html"], "Exodus");
        assert_eq!(nav.chapters["01-GEN.html"], vec!["gen-1".to_string()]);
        assert_eq!(nav.book_codes.len(), 1);
    }

    #[test]
    fn union_lets_the_newer_entry_win() {
        let mut nav = nav_with_title("index.html", "Old");
        nav.union(&nav_with_title("index.html", "New"));
        assert_eq!(nav.titles["index.html"], "New");
        assert_eq!(nav.titles.len(), 1);
    }

    #[test]
    fn empty_index_reports_empty() {
        let mut nav = NavIndex::default();
        assert!(nav.is_empty());
        nav.book_codes.insert("a".to_string(), "b".to_string());
        assert!(!nav.is_empty());
    }

    #[test]
    fn nav_index_wire_form_has_three_maps() {
        let nav = nav_with_title("01-GEN.html", "Genesis");
        let value = serde_json::to_value(&nav).unwrap();
        assert_eq!(value["titles"]["01-GEN.html"], "Genesis");
        assert!(value["chapters"].as_object().is_some_and(|m| m.is_empty()));
        let decoded: NavIndex = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn wraps_pages_and_records_titles() -> Result<()> {
        let templater = MemoryTemplater::new();
        let output = templater
            .template(TemplateRequest {
                resource_type: "ulb".to_string(),
                files: vec![StagedFile::new("01-GEN.html", "<h1>Genesis</h1><p>In the beginning</p>")],
                nav: NavIndex::default(),
                already_templated: Vec::new(),
            })
            .await?;

        assert_eq!(output.files.len(), 1);
        let body = String::from_utf8_lossy(&output.files[0].content).into_owned();
        assert!(body.contains("class=\"ulb\""));
        assert!(body.contains("In the beginning"));
        assert_eq!(output.nav.titles["01-GEN.html"], "Genesis");
        assert_eq!(templater.request_count()?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn untitled_pages_fall_back_to_the_file_stem() -> Result<()> {
        let templater = MemoryTemplater::new();
        let output = templater
            .template(TemplateRequest {
                resource_type: "ulb".to_string(),
                files: vec![StagedFile::new("front_matter.html", "<p>no heading</p>")],
                nav: NavIndex::default(),
                already_templated: Vec::new(),
            })
            .await?;
        assert_eq!(output.nav.titles["front_matter.html"], "front matter");
        Ok(())
    }

    #[tokio::test]
    async fn already_templated_pages_pass_through() -> Result<()> {
        let templater = MemoryTemplater::new();
        let previous = StagedFile::new("01-GEN.html", "<html>wrapped</html>");
        let output = templater
            .template(TemplateRequest {
                resource_type: "ulb".to_string(),
                files: vec![StagedFile::new("02-EXO.html", "<h1>Exodus</h1>")],
                nav: nav_with_title("01-GEN.html", "Genesis"),
                already_templated: vec![previous.clone()],
            })
            .await?;

        assert_eq!(output.files.len(), 2);
        assert!(output.files.contains(&previous));
        assert_eq!(output.nav.titles.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn queued_failure_fires_once() -> Result<()> {
        let templater = MemoryTemplater::new();
        templater.fail_next("template download failed")?;

        let request = TemplateRequest {
            resource_type: "ulb".to_string(),
            files: Vec::new(),
            nav: NavIndex::default(),
            already_templated: Vec::new(),
        };
        assert!(templater.template(request.clone()).await.is_err());
        templater.template(request).await?;
        assert_eq!(templater.request_count()?, 1);
        Ok(())
    }
}
