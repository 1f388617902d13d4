//! Completion queue abstraction.
//!
//! Linters report results through a queue rather than synchronous calls:
//! a linter publishes one [`QueueMessage`] under the key it was dispatched
//! with, and a waiting submission drains the queue until the keys it wants
//! have arrived. See [`crate::rendezvous`] for the waiting side.
//!
//! ## Design Principles
//!
//! - **At-least-once**: a received message stays hidden for a visibility
//!   window and reappears unless acknowledged. Consumers must tolerate
//!   duplicates.
//! - **Keyed, not addressed**: messages carry the key they answer; readers
//!   decide which keys they care about and leave the rest for others.
//! - **Backend agnostic**: same interface for hosted queue services and
//!   the in-memory queue used in tests.

pub mod memory;

pub use memory::MemoryQueue;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One completion report published by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// The rendezvous key this message answers.
    pub key: String,
    /// Whether the reporting worker ran to completion.
    pub success: bool,
    /// Worker-defined result body, absent for bare completion signals.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<serde_json::Value>,
}

impl QueueMessage {
    /// Creates a message with no payload.
    #[must_use]
    pub fn new(key: impl Into<String>, success: bool) -> Self {
        Self {
            key: key.into(),
            success,
            payload: None,
        }
    }

    /// Attaches a result body.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A message handed to a consumer, with the receipt needed to settle it.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Opaque receipt identifying this delivery.
    pub receipt: String,
    /// The message body.
    pub message: QueueMessage,
}

/// Queue abstraction for worker completion reports.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent producers and
/// consumers.
#[async_trait]
pub trait CompletionQueue: Send + Sync {
    /// Publishes a completion report.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Dispatch`] if the queue cannot
    /// accept the message.
    async fn send(&self, message: QueueMessage) -> Result<()>;

    /// Receives up to `max_messages` visible messages.
    ///
    /// Returned messages stay hidden from other receivers for
    /// `visibility_timeout`, then reappear unless acknowledged. An empty
    /// vector means nothing is currently visible, not that the queue is
    /// drained.
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>>;

    /// Permanently removes a received message.
    ///
    /// Acknowledging an unknown or already-settled receipt is a no-op.
    async fn acknowledge(&self, receipt: &str) -> Result<()>;

    /// Returns the queue's name or identifier.
    fn queue_name(&self) -> &str;
}
