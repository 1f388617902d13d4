//! # bindery-flow
//!
//! Orchestration backbone of the bindery document conversion pipeline.
//!
//! This crate implements the pipeline domain, providing:
//!
//! - **Job Splitting**: One webhook submission fanned out into per-book
//!   part jobs with seeded build log documents
//! - **Callback Aggregation**: Converter and linter reports folded into
//!   job rows and per-part documents
//! - **Completion Merge**: Flag-counted assembly of the commit-level
//!   master document
//! - **Deployment**: Templated publication to the public site, finished
//!   by a write-last `deployed` flag
//!
//! ## Core Concepts
//!
//! - **Job**: One conversion unit, a whole commit or one book-sized part
//!   of it, persisted as a whole-row record
//! - **Build Log**: The public JSON document mirroring a job, written to
//!   the artifact store next to the converted output
//! - **Flags**: Zero-byte objects (`finished`, `deployed`) that are the
//!   pipeline's only cross-part coordination signal
//!
//! ## Guarantees
//!
//! - **Idempotent**: Every stage re-derives where it stands from store
//!   objects, so re-invocation after a crash or duplicate trigger is safe
//! - **Coordination-free**: No locks, transactions, or compare-and-swap;
//!   the store contract is blind whole-object writes, last writer wins
//! - **Convergent**: Merges are pure functions of the part documents,
//!   so repeated runs settle on the same master
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use bindery_core::{Config, MemoryStore};
//! use bindery_flow::dispatch::MemoryInvoker;
//! use bindery_flow::error::Result;
//! use bindery_flow::job::Identifier;
//! use bindery_flow::modules::ModuleRegistry;
//! use bindery_flow::queue::MemoryQueue;
//! use bindery_flow::splitter::JobSplitter;
//! use bindery_flow::store::MemoryJobStore;
//!
//! # fn main() -> Result<()> {
//! // Wire the splitter against in-memory collaborators.
//! let _splitter = JobSplitter::new(
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(MemoryStore::new()),
//!     ModuleRegistry::new(),
//!     Arc::new(MemoryInvoker::new()),
//!     Arc::new(MemoryQueue::new("lint-results")),
//!     Config::default(),
//! );
//!
//! // Callback identifiers distinguish whole commits from split parts.
//! let id = Identifier::parse("01JA5M7V9BHG8R2Y4W6D8F0K2M/2/0/01-GEN")?;
//! assert!(id.is_part());
//! assert_eq!(id.part_count(), 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod build_log;
pub mod callback;
pub mod deployer;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod merge;
pub mod metrics;
pub mod modules;
pub mod queue;
pub mod rendezvous;
pub mod splitter;
pub mod store;
pub mod template;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::build_log::{BuildLogDocument, BuildStatus, LinterLogDocument};
    pub use crate::callback::{CallbackAggregator, WorkerCallback};
    pub use crate::deployer::{DeployOutcome, DeployState, Deployer};
    pub use crate::dispatch::{Invoker, MemoryInvoker, WorkerRequest};
    pub use crate::error::{Error, Result};
    pub use crate::job::{Identifier, Job, JobStatus};
    pub use crate::merge::{CompletionMerge, MergeOutcome};
    pub use crate::metrics::PipelineMetrics;
    pub use crate::queue::{CompletionQueue, MemoryQueue, QueueMessage};
    pub use crate::rendezvous::{CompletionRendezvous, WaitOptions};
    pub use crate::splitter::{JobSplitter, Preprocessed, SubmissionOutcome, WebhookSubmission};
    pub use crate::store::{JobQuery, JobStore, MemoryJobStore};
    pub use crate::template::{
        MemoryTemplater, NavIndex, StagedFile, TemplateOutput, TemplateRequest, Templater,
    };
}
