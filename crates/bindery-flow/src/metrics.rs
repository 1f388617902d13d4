//! Observability metrics for the conversion pipeline.
//!
//! This module provides Prometheus-compatible metrics for monitoring the
//! pipeline backbone. Metrics are designed to support:
//!
//! - **Alerting**: failure-rate alerts on callbacks, merges, and deploys
//! - **Dashboards**: submission volume and end-to-end publish latency
//! - **Debugging**: correlating metrics with traces for root cause analysis
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `bindery_flow_submissions_total` | Counter | `kind` | Webhook submissions by split shape |
//! | `bindery_flow_parts_split_total` | Counter | - | Job parts created by splitting |
//! | `bindery_flow_dispatches_total` | Counter | `kind`, `result` | Worker invocations by kind and outcome |
//! | `bindery_flow_callbacks_total` | Counter | `origin`, `status` | Worker callbacks by origin and final status |
//! | `bindery_flow_callback_duration_seconds` | Histogram | `origin` | Callback handling time |
//! | `bindery_flow_merges_total` | Counter | `result` | Merge attempts by outcome |
//! | `bindery_flow_rendezvous_wait_seconds` | Histogram | `result` | Time spent waiting on linter reports |
//! | `bindery_flow_deploys_total` | Counter | `outcome` | Deploy requests by outcome |
//! | `bindery_flow_deploy_duration_seconds` | Histogram | - | Deploy handling time |
//! | `bindery_flow_sweep_requeued_total` | Counter | - | Stale commits requeued by the sweep |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bindery_flow::metrics::PipelineMetrics;
//!
//! let metrics = PipelineMetrics::new();
//!
//! // Record a two-part submission
//! metrics.record_submission(2);
//!
//! // Record a converter callback that ended in warnings
//! metrics.record_callback("converter", "warnings");
//! ```
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade; the embedding
//! service installs whatever recorder or exporter fits its deployment.
//! Without a recorder installed every call is a no-op.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: webhook submissions by split shape.
    pub const SUBMISSIONS_TOTAL: &str = "bindery_flow_submissions_total";
    /// Counter: job parts created by splitting.
    pub const PARTS_SPLIT_TOTAL: &str = "bindery_flow_parts_split_total";
    /// Counter: worker invocations by kind and outcome.
    pub const DISPATCHES_TOTAL: &str = "bindery_flow_dispatches_total";
    /// Counter: worker callbacks by origin and final status.
    pub const CALLBACKS_TOTAL: &str = "bindery_flow_callbacks_total";
    /// Histogram: callback handling time in seconds.
    pub const CALLBACK_DURATION_SECONDS: &str = "bindery_flow_callback_duration_seconds";
    /// Counter: merge attempts by outcome.
    pub const MERGES_TOTAL: &str = "bindery_flow_merges_total";
    /// Histogram: time spent waiting on linter reports in seconds.
    pub const RENDEZVOUS_WAIT_SECONDS: &str = "bindery_flow_rendezvous_wait_seconds";
    /// Counter: deploy requests by outcome.
    pub const DEPLOYS_TOTAL: &str = "bindery_flow_deploys_total";
    /// Histogram: deploy handling time in seconds.
    pub const DEPLOY_DURATION_SECONDS: &str = "bindery_flow_deploy_duration_seconds";
    /// Counter: stale commits requeued by the sweep.
    pub const SWEEP_REQUEUED_TOTAL: &str = "bindery_flow_sweep_requeued_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Split shape (single, multi) or dispatch kind (converter, linter, deploy).
    pub const KIND: &str = "kind";
    /// Callback origin (converter, linter).
    pub const ORIGIN: &str = "origin";
    /// Operation result (ok, error, merged, incomplete, complete).
    pub const RESULT: &str = "result";
    /// Final job status (success, warnings, failed).
    pub const STATUS: &str = "status";
    /// Deploy outcome (published, part_staged, already_published, not_ready).
    pub const OUTCOME: &str = "outcome";
}

/// High-level interface for recording pipeline metrics.
///
/// Cheap to clone and share across submissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineMetrics;

impl PipelineMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one webhook submission and the parts it split into.
    pub fn record_submission(&self, parts: u32) {
        let kind = if parts > 1 { "multi" } else { "single" };
        counter!(
            names::SUBMISSIONS_TOTAL,
            labels::KIND => kind.to_string(),
        )
        .increment(1);
        counter!(names::PARTS_SPLIT_TOTAL).increment(u64::from(parts));
    }

    /// Records a worker invocation.
    ///
    /// Increments the `bindery_flow_dispatches_total` counter.
    pub fn record_dispatch(&self, kind: &str, result: &str) {
        counter!(
            names::DISPATCHES_TOTAL,
            labels::KIND => kind.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records a handled worker callback.
    ///
    /// Increments the `bindery_flow_callbacks_total` counter.
    pub fn record_callback(&self, origin: &str, status: &str) {
        counter!(
            names::CALLBACKS_TOTAL,
            labels::ORIGIN => origin.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records callback handling time.
    pub fn observe_callback_duration(&self, origin: &str, duration: Duration) {
        histogram!(
            names::CALLBACK_DURATION_SECONDS,
            labels::ORIGIN => origin.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a merge attempt.
    ///
    /// Increments the `bindery_flow_merges_total` counter.
    pub fn record_merge(&self, result: &str) {
        counter!(
            names::MERGES_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records how long a submission waited for linter reports.
    pub fn observe_rendezvous_wait(&self, result: &str, duration: Duration) {
        histogram!(
            names::RENDEZVOUS_WAIT_SECONDS,
            labels::RESULT => result.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Records a deploy request.
    ///
    /// Increments the `bindery_flow_deploys_total` counter.
    pub fn record_deploy(&self, outcome: &str) {
        counter!(
            names::DEPLOYS_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records deploy handling time.
    pub fn observe_deploy_duration(&self, duration: Duration) {
        histogram!(names::DEPLOY_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Records how many stale commits a sweep requeued.
    pub fn record_sweep_requeued(&self, count: u64) {
        counter!(names::SWEEP_REQUEUED_TOTAL).increment(count);
    }
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
///
/// ## Example
///
/// ```rust,no_run
/// use bindery_flow::metrics::{PipelineMetrics, TimingGuard};
///
/// let metrics = PipelineMetrics::new();
///
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_deploy_duration(duration);
///     });
///
///     // Do work...
/// } // Duration recorded automatically on drop
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard for deploy metrics.
#[must_use]
pub fn time_deploy() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| {
        PipelineMetrics::new().observe_deploy_duration(duration);
    })
}
