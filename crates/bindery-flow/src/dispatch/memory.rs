//! In-memory invoker for testing.
//!
//! This module provides [`MemoryInvoker`], a recording implementation of
//! the [`Invoker`] trait suitable for testing and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: nothing is executed, invocations are
//!   only recorded
//! - **Single-process only**: recorded state is not shared across process
//!   boundaries

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::Invoker;
use crate::error::{Error, Result};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Function name that was invoked.
    pub function: String,
    /// Payload the function was invoked with.
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct InvokerState {
    invocations: Vec<Invocation>,
    failures: VecDeque<String>,
}

/// Recording invoker for tests.
///
/// Invocations are appended in dispatch order; tests inspect them with
/// [`invocations`](Self::invocations) or drain them with
/// [`take_invocations`](Self::take_invocations).
#[derive(Debug, Default)]
pub struct MemoryInvoker {
    state: RwLock<InvokerState>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("invoker lock poisoned")
}

impl MemoryInvoker {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for the next `invoke` call.
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

    /// Returns a copy of every recorded invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn invocations(&self) -> Result<Vec<Invocation>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.invocations.clone())
    }

    /// Drains and returns every recorded invocation.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn take_invocations(&self) -> Result<Vec<Invocation>> {
        let mut state = self.state.write().map_err(poison_err)?;
        let drained = std::mem::take(&mut state.invocations);
        drop(state);
        Ok(drained)
    }

    /// Returns the number of recorded invocations.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn invocation_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.invocations.len())
    }
}

#[async_trait]
impl Invoker for MemoryInvoker {
    async fn invoke(&self, function: &str, payload: serde_json::Value) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;

        if let Some(message) = state.failures.pop_front() {
            drop(state);
            return Err(Error::dispatch(message));
        }

        tracing::debug!(function, "recording invocation");
        state.invocations.push(Invocation {
            function: function.to_string(),
            payload,
        });
        drop(state);
        Ok(())
    }
}
