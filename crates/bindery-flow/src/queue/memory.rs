//! In-memory completion queue for testing.
//!
//! This module provides [`MemoryQueue`], a visibility-timeout queue
//! implementing the [`CompletionQueue`] trait, suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no persistence, no distribution
//! - **Single-process only**: messages are not visible across process
//!   boundaries
//! - **Wall-clock visibility**: visibility windows use the system clock;
//!   tests that need redelivery use [`MemoryQueue::make_all_visible`]
//!   instead of waiting

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::{CompletionQueue, QueueMessage, ReceivedMessage};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    receipt: String,
    visible_at: DateTime<Utc>,
    message: QueueMessage,
}

/// In-memory completion queue for tests.
///
/// Messages become invisible for the requested window when received and
/// reappear unless acknowledged, matching hosted queue semantics closely
/// enough for rendezvous tests.
#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    entries: RwLock<Vec<Entry>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("queue lock poisoned")
}

impl MemoryQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Returns the total number of messages, visible or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn message_count(&self) -> Result<usize> {
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries.len())
    }

    /// Expires every visibility window, forcing redelivery.
    ///
    /// Returns how many messages became visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn make_all_visible(&self) -> Result<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(poison_err)?;
        let mut exposed = 0;
        for entry in entries.iter_mut() {
            if entry.visible_at > now {
                entry.visible_at = now;
                exposed += 1;
            }
        }
        drop(entries);
        Ok(exposed)
    }
}

#[async_trait]
impl CompletionQueue for MemoryQueue {
    async fn send(&self, message: QueueMessage) -> Result<()> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        entries.push(Entry {
            receipt: Ulid::new().to_string(),
            visible_at: Utc::now(),
            message,
        });
        drop(entries);
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>> {
        let now = Utc::now();
        let delta = chrono::Duration::from_std(visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let hidden_until = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut entries = self.entries.write().map_err(poison_err)?;
        let mut received = Vec::new();
        for entry in entries.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if entry.visible_at <= now {
                entry.visible_at = hidden_until;
                received.push(ReceivedMessage {
                    receipt: entry.receipt.clone(),
                    message: entry.message.clone(),
                });
            }
        }
        drop(entries);
        Ok(received)
    }

    async fn acknowledge(&self, receipt: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(poison_err)?;
        entries.retain(|e| e.receipt != receipt);
        drop(entries);
        Ok(())
    }

    fn queue_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIBILITY: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn send_and_receive() -> Result<()> {
        let queue = MemoryQueue::new("lint-results");
        queue.send(QueueMessage::new("lint/01H5/0", true)).await?;

        let received = queue.receive(10, VISIBILITY).await?;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message.key, "lint/01H5/0");
        assert!(received[0].message.success);
        Ok(())
    }

    #[tokio::test]
    async fn received_messages_are_hidden_until_redelivery() -> Result<()> {
        let queue = MemoryQueue::new("lint-results");
        queue.send(QueueMessage::new("lint/01H5/0", true)).await?;

        let first = queue.receive(10, VISIBILITY).await?;
        assert_eq!(first.len(), 1);

        // Still inside the visibility window: nothing to see.
        let second = queue.receive(10, VISIBILITY).await?;
        assert!(second.is_empty());
        assert_eq!(queue.message_count()?, 1);

        // Expired window: the same message comes back.
        assert_eq!(queue.make_all_visible()?, 1);
        let third = queue.receive(10, VISIBILITY).await?;
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].message.key, "lint/01H5/0");
        Ok(())
    }

    #[tokio::test]
    async fn acknowledged_messages_never_return() -> Result<()> {
        let queue = MemoryQueue::new("lint-results");
        queue.send(QueueMessage::new("lint/01H5/0", true)).await?;

        let received = queue.receive(10, VISIBILITY).await?;
        queue.acknowledge(&received[0].receipt).await?;

        queue.make_all_visible()?;
        assert!(queue.receive(10, VISIBILITY).await?.is_empty());
        assert_eq!(queue.message_count()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn acknowledge_unknown_receipt_is_a_no_op() -> Result<()> {
        let queue = MemoryQueue::new("lint-results");
        queue.send(QueueMessage::new("lint/01H5/0", true)).await?;
        queue.acknowledge("no-such-receipt").await?;
        assert_eq!(queue.message_count()?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn receive_respects_the_cap() -> Result<()> {
        let queue = MemoryQueue::new("lint-results");
        for index in 0..5 {
            queue
                .send(QueueMessage::new(format!("lint/01H5/{index}"), true))
                .await?;
        }

        let first = queue.receive(3, VISIBILITY).await?;
        assert_eq!(first.len(), 3);

        let rest = queue.receive(10, VISIBILITY).await?;
        assert_eq!(rest.len(), 2);
        Ok(())
    }

    #[test]
    fn queue_name() {
        let queue = MemoryQueue::new("lint-results");
        assert_eq!(queue.queue_name(), "lint-results");
    }
}
