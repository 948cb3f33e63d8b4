//! # Event Bus System
//!
//! Typed status events for the upload core, delivered over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: `QueueEvent` (enqueue, data loss, orphan cleanup) and
//!   `UploadEvent` (pass lifecycle and per-item outcomes)
//! - **EventBus**: central broadcast channel
//! - **EventStream**: receiver wrapper with filtering
//!
//! Hosts usually subscribe once and surface only `Error`/`Warning` severity
//! events to the user. Transient retries are `Debug` so routine network
//! hiccups never reach the UI.
//!
//! ```text
//! ┌──────────────┐  emit   ┌──────────┐  subscribe  ┌──────────┐
//! │ CaptureIntake├────────>│          ├────────────>│ Host UI  │
//! └──────────────┘         │ EventBus │             └──────────┘
//! ┌──────────────┐  emit   │          │  subscribe  ┌──────────┐
//! │  SyncEngine  ├────────>│          ├────────────>│ Telemetry│
//! └──────────────┘         └──────────┘             └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, EventSeverity, EventStream};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut visible = EventStream::new(bus.subscribe())
//!     .filter(|event| event.severity() >= EventSeverity::Warning);
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep receiving.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Queue contents changed outside of an upload pass
    Queue(QueueEvent),
    /// Upload pass lifecycle and item outcomes
    Upload(UploadEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Queue(e) => e.description(),
            CoreEvent::Upload(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Queue(QueueEvent::DataLoss { .. }) => EventSeverity::Error,
            CoreEvent::Upload(UploadEvent::ItemDropped { .. }) => EventSeverity::Error,
            CoreEvent::Upload(UploadEvent::PassAborted { .. }) => EventSeverity::Warning,
            CoreEvent::Queue(QueueEvent::Enqueued { .. }) => EventSeverity::Info,
            CoreEvent::Upload(UploadEvent::ItemUploaded { .. }) => EventSeverity::Info,
            CoreEvent::Upload(UploadEvent::PassCompleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Queue Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// A capture was quarantined and recorded.
    Enqueued {
        item_id: String,
        media_kind: String,
        /// Queue length after the insert
        pending: u64,
    },
    /// Persisted records were discarded because they could not be read back.
    DataLoss {
        /// Number of records known to be lost, when it can be counted
        records_lost: Option<u64>,
        /// Where the damaged database was moved, if it was isolated
        isolated_path: Option<String>,
        reason: String,
    },
    /// Quarantined files with no queue record were deleted at startup.
    OrphansSwept { removed: u64 },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Enqueued { .. } => "Capture queued for upload",
            QueueEvent::DataLoss { .. } => "Pending uploads were lost",
            QueueEvent::OrphansSwept { .. } => "Removed unreferenced capture files",
        }
    }
}

// ============================================================================
// Upload Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum UploadEvent {
    /// A pass took its queue snapshot.
    PassStarted { pass_id: String, pending: u64 },
    /// An item was uploaded, its document written, and it left the queue.
    ItemUploaded {
        item_id: String,
        object_key: String,
    },
    /// An item failed transiently and stays queued.
    ItemRetryScheduled {
        item_id: String,
        attempts: u32,
        retry_in_secs: u64,
        error_kind: String,
    },
    /// An item failed permanently and was removed along with its file.
    ItemDropped {
        item_id: String,
        error_kind: String,
        message: String,
    },
    /// The pass stopped before touching further items (offline, signed out).
    PassAborted { pass_id: String, reason: String },
    /// The pass walked the whole snapshot.
    PassCompleted {
        pass_id: String,
        uploaded: u64,
        dropped: u64,
        deferred: u64,
        /// Queue length after the pass
        pending: u64,
        duration_ms: u64,
    },
}

impl UploadEvent {
    fn description(&self) -> &str {
        match self {
            UploadEvent::PassStarted { .. } => "Upload pass started",
            UploadEvent::ItemUploaded { .. } => "Capture uploaded",
            UploadEvent::ItemRetryScheduled { .. } => "Upload will be retried",
            UploadEvent::ItemDropped { .. } => "Capture could not be uploaded",
            UploadEvent::PassAborted { .. } => "Upload pass aborted",
            UploadEvent::PassCompleted { .. } => "Upload pass completed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cloning the bus clones the sender; every `subscribe()` creates an
/// independent receiver that sees all future events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening. Publishers in this workspace ignore that error.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` that skips events rejected by a filter.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching events are currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
