//! Observability infrastructure for bindery.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors shared by every pipeline
//! component.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `bindery_flow=debug`)
///
/// # Example
///
/// ```rust
/// use bindery_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for submission-side operations with standard fields.
///
/// # Example
///
/// ```rust
/// use bindery_core::observability::submission_span;
///
/// let span = submission_span("split", "unfolding", "en-ulb", "22f3d09f7a");
/// let _guard = span.enter();
/// // ... process the submission
/// ```
#[must_use]
pub fn submission_span(operation: &str, owner: &str, repo: &str, commit: &str) -> Span {
    tracing::info_span!(
        "submission",
        op = operation,
        owner = owner,
        repo = repo,
        commit = commit,
    )
}

/// Creates a span for publication-side operations.
///
/// # Example
///
/// ```rust
/// use bindery_core::observability::deploy_span;
///
/// let span = deploy_span("deploy", "unfolding/en-ulb/22f3d09f7a");
/// let _guard = span.enter();
/// // ... publish the commit
/// ```
#[must_use]
pub fn deploy_span(operation: &str, commit_key: &str) -> Span {
    tracing::info_span!("deploy", op = operation, commit_key = commit_key)
}
