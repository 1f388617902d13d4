//! # bindery-core
//!
//! Core abstractions for the bindery conversion pipeline.
//!
//! This crate provides the foundational types used across the pipeline
//! components:
//!
//! - **Identifiers**: Strongly-typed job IDs
//! - **Commit Paths**: The storage key scheme every artifact lives under
//! - **Object Store**: The blob-store trait the pipeline is written against
//! - **Configuration**: Explicit, immutable runtime configuration
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `bindery-core` is the only crate allowed to define shared primitives.
//! The orchestration crate (`bindery-flow`) builds on these contracts and
//! never reaches around them.
//!
//! ## Example
//!
//! ```rust
//! use bindery_core::prelude::*;
//!
//! let job_id = JobId::generate();
//! assert_eq!(job_id.to_string().len(), 26);
//!
//! let commit = CommitRef::new("unfolding", "en-ulb", "22f3d09f7a")?;
//! let key = commit.paths().build_log();
//! assert!(key.ends_with("build_log.json"));
//! # Ok::<(), bindery_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod id;
pub mod observability;
pub mod paths;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use bindery_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::id::JobId;
    pub use crate::paths::{CommitPaths, CommitRef};
    pub use crate::storage::{MemoryStore, ObjectMeta, ObjectStore};
}

// Re-export key types at crate root for ergonomics
pub use config::Config;
pub use error::{Error, Result};
pub use id::JobId;
pub use observability::{LogFormat, init_logging};
pub use paths::{CommitPaths, CommitRef};
pub use storage::{MemoryStore, ObjectMeta, ObjectStore};
