//! Waiting for linter completion reports.
//!
//! Converters coordinate through artifact-store flags and never block
//! anything. Linters are different: a submission that wants lint results
//! folded into its build logs must wait for them, and
//! [`CompletionRendezvous`] is that one blocking point.
//!
//! A rendezvous wraps a [`CompletionQueue`] and collects messages for a
//! set of awaited keys. Messages for other keys are left unacknowledged
//! so their own waiter sees them after the visibility window. Waiting is
//! bounded: on timeout the caller proceeds with whatever arrived and
//! records the rest as missing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::{CompletionQueue, QueueMessage};

/// Largest serialized message the queue contract accepts.
pub const MAX_MESSAGE_BYTES: usize = 256_000;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PER_POLL: usize = 10;
const CLEAR_WINDOW: Duration = Duration::from_secs(2);

/// Why a rendezvous stopped short.
///
/// Faults are recorded, not returned: the pipeline degrades to "proceed
/// without lint results" rather than failing a submission over them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezvousFault {
    /// A message exceeded [`MAX_MESSAGE_BYTES`] and was not sent.
    Oversize {
        /// Serialized size of the rejected message.
        size: usize,
        /// The size limit that was exceeded.
        limit: usize,
    },
    /// The queue failed while sending or receiving.
    Unavailable {
        /// Description of the queue failure.
        message: String,
    },
}

impl std::fmt::Display for RendezvousFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversize { size, limit } => {
                write!(f, "message of {size} bytes exceeds the {limit} byte limit")
            }
            Self::Unavailable { message } => write!(f, "queue unavailable: {message}"),
        }
    }
}

/// Tuning for one waiting pass.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    /// Total time to wait before giving up.
    pub timeout: Duration,
    /// How long received messages stay hidden from other readers.
    pub visibility_timeout: Duration,
    /// Pause between polls that return nothing.
    pub poll_interval: Duration,
    /// Messages to request per poll.
    pub max_per_poll: usize,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_per_poll: DEFAULT_MAX_PER_POLL,
        }
    }
}

impl WaitOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total wait timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the visibility window for received messages.
    #[must_use]
    pub const fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Sets the pause between empty polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how many messages each poll requests.
    #[must_use]
    pub const fn with_max_per_poll(mut self, max: usize) -> Self {
        self.max_per_poll = max;
        self
    }
}

/// Collects completion reports for a set of awaited keys.
///
/// One rendezvous serves one waiting pass; state is reset by
/// [`wait_for`](Self::wait_for). Not shared across tasks.
pub struct CompletionRendezvous {
    queue: Arc<dyn CompletionQueue>,
    received: BTreeMap<String, QueueMessage>,
    awaited: Vec<String>,
    last_fault: Option<RendezvousFault>,
}

impl CompletionRendezvous {
    /// Creates a rendezvous over a completion queue.
    #[must_use]
    pub fn new(queue: Arc<dyn CompletionQueue>) -> Self {
        Self {
            queue,
            received: BTreeMap::new(),
            awaited: Vec::new(),
            last_fault: None,
        }
    }

    /// Publishes a completion report, enforcing the size limit.
    ///
    /// Returns false and records a fault when the message is oversize or
    /// the queue rejects it; the pipeline treats an unsent report like a
    /// linter that never finished.
    pub async fn send(
        &mut self,
        key: impl Into<String>,
        success: bool,
        payload: Option<serde_json::Value>,
    ) -> bool {
        let mut message = QueueMessage::new(key, success);
        if let Some(payload) = payload {
            message = message.with_payload(payload);
        }

        let size = match serde_json::to_vec(&message) {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                self.last_fault = Some(RendezvousFault::Unavailable {
                    message: e.to_string(),
                });
                return false;
            }
        };
        if size > MAX_MESSAGE_BYTES {
            tracing::warn!(key = %message.key, size, "completion report too large, dropping");
            self.last_fault = Some(RendezvousFault::Oversize {
                size,
                limit: MAX_MESSAGE_BYTES,
            });
            return false;
        }

        if let Err(e) = self.queue.send(message).await {
            self.last_fault = Some(RendezvousFault::Unavailable {
                message: e.to_string(),
            });
            return false;
        }
        true
    }

    /// Waits until every key in `keys` has reported or the timeout lapses.
    ///
    /// Returns true only when everything arrived. Messages for awaited
    /// keys are acknowledged and recorded (duplicates acknowledged and
    /// dropped); messages for other keys are left for their own waiter.
    /// On a queue fault the wait stops early with the fault recorded.
    #[tracing::instrument(skip_all, fields(awaited = keys.len()))]
    pub async fn wait_for(&mut self, keys: &[String], options: &WaitOptions) -> bool {
        self.awaited = keys.to_vec();
        self.received.clear();
        self.last_fault = None;

        let deadline = tokio::time::Instant::now() + options.timeout;
        loop {
            let batch = match self
                .queue
                .receive(options.max_per_poll, options.visibility_timeout)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(error = %e, "completion queue receive failed");
                    self.last_fault = Some(RendezvousFault::Unavailable {
                        message: e.to_string(),
                    });
                    return false;
                }
            };

            let batch_was_empty = batch.is_empty();
            for delivery in batch {
                if !self.awaited.contains(&delivery.message.key) {
                    continue;
                }
                if let Err(e) = self.queue.acknowledge(&delivery.receipt).await {
                    tracing::warn!(error = %e, key = %delivery.message.key, "acknowledge failed");
                }
                self.received
                    .entry(delivery.message.key.clone())
                    .or_insert(delivery.message);
            }

            if self.awaited.iter().all(|k| self.received.contains_key(k)) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::info!(
                    missing = self.awaited.len() - self.received.len(),
                    "gave up waiting for completion reports"
                );
                return false;
            }
            if batch_was_empty {
                tokio::time::sleep(options.poll_interval).await;
            }
        }
    }

    /// Discards stale reports for `keys` left over from an earlier run.
    ///
    /// Called before dispatching new linters for a commit that was built
    /// before. Drains briefly; returns false only on a queue fault.
    pub async fn clear_old(&mut self, keys: &[String]) -> bool {
        self.awaited.clear();
        self.received.clear();
        self.last_fault = None;

        let deadline = tokio::time::Instant::now() + CLEAR_WINDOW;
        loop {
            let batch = match self
                .queue
                .receive(DEFAULT_MAX_PER_POLL, Duration::from_secs(1))
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    self.last_fault = Some(RendezvousFault::Unavailable {
                        message: e.to_string(),
                    });
                    return false;
                }
            };
            if batch.is_empty() {
                return true;
            }
            for delivery in batch {
                if keys.contains(&delivery.message.key) {
                    tracing::debug!(key = %delivery.message.key, "discarding stale report");
                    if let Err(e) = self.queue.acknowledge(&delivery.receipt).await {
                        tracing::warn!(error = %e, "acknowledge failed");
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return true;
            }
        }
    }

    /// The reports collected by the last wait, keyed by rendezvous key.
    #[must_use]
    pub fn received(&self) -> &BTreeMap<String, QueueMessage> {
        &self.received
    }

    /// Awaited keys the last wait never heard from, in awaited order.
    #[must_use]
    pub fn unreceived(&self) -> Vec<&str> {
        self.awaited
            .iter()
            .filter(|k| !self.received.contains_key(*k))
            .map(String::as_str)
            .collect()
    }

    /// The most recent fault, if the last operation hit one.
    #[must_use]
    pub fn last_fault(&self) -> Option<&RendezvousFault> {
        self.last_fault.as_ref()
    }
}
