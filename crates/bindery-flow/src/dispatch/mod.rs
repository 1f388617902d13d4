//! Worker dispatch abstraction.
//!
//! This module provides:
//!
//! - [`Invoker`]: trait for firing worker functions
//! - [`WorkerRequest`]: serializable dispatch payload
//! - [`MemoryInvoker`](memory::MemoryInvoker): recording invoker for tests
//!
//! ## Design Principles
//!
//! - **Fire-and-forget**: `invoke` returns once the invocation is accepted.
//!   Results never come back through the call; converters report via HTTP
//!   callbacks, linters additionally via the completion queue.
//! - **Backend agnostic**: same interface for cloud functions, containers,
//!   or local workers.
//! - **Structured payloads**: JSON-serializable request envelopes with a
//!   stable snake_case wire form.

pub mod memory;

pub use memory::{Invocation, MemoryInvoker};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bindery_core::Config;

use crate::error::{Error, Result};
use crate::job::Job;

/// Payload sent to a converter or linter worker.
///
/// Field names are part of the worker contract and must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Composite job identifier, echoed back in the worker's callback.
    pub identifier: String,
    /// URL of the source archive to fetch.
    pub source_url: String,
    /// Resource type of the content (e.g. `ulb`, `obs`).
    pub resource_id: String,
    /// Artifact-store bucket for converted output.
    pub cdn_bucket: String,
    /// Key prefix within the bucket for converted output.
    pub cdn_file: String,
    /// Module-specific options, passed through untouched.
    pub options: serde_json::Value,
    /// Where the worker reports completion.
    pub callback_url: String,
    /// Extra dispatch data. For linters this is the completion-queue key
    /// the results must land under; converters get none.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub extra: Option<serde_json::Value>,
}

impl WorkerRequest {
    /// Builds the payload for a converter dispatch.
    #[must_use]
    pub fn convert_request(job: &Job, config: &Config) -> Self {
        Self {
            identifier: job.identifier.to_string(),
            source_url: job.source.clone(),
            resource_id: job.resource_type.clone(),
            cdn_bucket: config.cdn_bucket.clone(),
            cdn_file: job.cdn_file.clone(),
            options: job.options.clone(),
            callback_url: config.converter_callback_url(),
            extra: None,
        }
    }

    /// Builds the payload for a linter dispatch.
    ///
    /// `results_key` is where the linter must report on the completion
    /// queue; the splitter waits on it when linter rendezvous is enabled.
    #[must_use]
    pub fn lint_request(job: &Job, config: &Config, results_key: impl Into<String>) -> Self {
        Self {
            identifier: job.identifier.to_string(),
            source_url: job.source.clone(),
            resource_id: job.resource_type.clone(),
            cdn_bucket: config.cdn_bucket.clone(),
            cdn_file: job.cdn_file.clone(),
            options: job.options.clone(),
            callback_url: config.linter_callback_url(),
            extra: Some(serde_json::Value::String(results_key.into())),
        }
    }

    /// The completion-queue key carried in `extra`, if any.
    #[must_use]
    pub fn results_key(&self) -> Option<&str> {
        self.extra.as_ref().and_then(serde_json::Value::as_str)
    }

    /// Serializes the request for an [`Invoker`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the options value cannot be
    /// represented as JSON.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Parses a request back out of an invocation payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the payload does not match the
    /// wire form.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Invokes deployed worker functions.
///
/// Implementations may target cloud function services, container runners,
/// or local in-process workers for testing.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent dispatch from
/// multiple submissions.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Fires `function` with `payload`, returning once accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dispatch`] if the invocation cannot be accepted.
    /// A worker failing later is not an invoke error; that surfaces via
    /// the worker's callback or its absence.
    async fn invoke(&self, function: &str, payload: serde_json::Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Identifier;
    use bindery_core::{CommitRef, JobId};

    fn sample_job() -> Job {
        let commit = CommitRef::new("unfolding", "en-ulb", "22f3d09f7a").expect("valid commit");
        let mut job = Job::new(
            JobId::generate(),
            Identifier::Single(commit.clone()),
            commit,
            "unfolding",
            "ulb",
            "usfm",
            "html",
            "https://git.example.test/archive.zip",
        );
        job.cdn_file = "unfolding/en-ulb/22f3d09f7a".to_string();
        job.options = serde_json::json!({"line_spacing": "120%"});
        job
    }

    #[test]
    fn convert_request_targets_the_converter_callback() {
        let config = Config::default();
        let request = WorkerRequest::convert_request(&sample_job(), &config);
        assert_eq!(request.identifier, "unfolding/en-ulb/22f3d09f7a");
        assert_eq!(request.callback_url, config.converter_callback_url());
        assert_eq!(request.cdn_bucket, config.cdn_bucket);
        assert!(request.extra.is_none());
        assert!(request.results_key().is_none());
    }

    #[test]
    fn lint_request_carries_the_results_key() {
        let config = Config::default();
        let request = WorkerRequest::lint_request(&sample_job(), &config, "lint/01H5/0");
        assert_eq!(request.callback_url, config.linter_callback_url());
        assert_eq!(request.results_key(), Some("lint/01H5/0"));
    }

    #[test]
    fn payload_roundtrips_and_skips_absent_extra() -> Result<()> {
        let config = Config::default();
        let request = WorkerRequest::convert_request(&sample_job(), &config);

        let payload = request.to_payload()?;
        assert!(payload.get("extra").is_none());
        assert_eq!(payload["source_url"], request.source_url);
        assert_eq!(payload["options"]["line_spacing"], "120%");

        let back = WorkerRequest::from_payload(&payload)?;
        assert_eq!(back.identifier, request.identifier);
        assert_eq!(back.cdn_file, request.cdn_file);
        Ok(())
    }

    #[test]
    fn malformed_payload_is_a_serialization_error() {
        let result = WorkerRequest::from_payload(&serde_json::json!({"identifier": 7}));
        assert!(matches!(result, Err(Error::Serialization { .. })));
    }
}
