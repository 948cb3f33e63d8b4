//! # Capture Upload Queue & Sync Engine
//!
//! Guarantees that captured media eventually reaches the remote object and
//! metadata stores, across crashes, flaky connectivity and overlapping
//! wake-ups.
//!
//! ## Overview
//!
//! ```text
//! capture ─> QuarantineStore ─> QueueStore ─> TriggerCoordinator ─> SyncEngine ─> remote stores
//!            (owns the file)    (encrypted,    (connectivity,        (one pass at
//!                                durable)       periodic, manual)     a time)
//! ```
//!
//! ## Components
//!
//! - **Item model** (`item`): `QueueItem`, the only persisted entity
//! - **Quarantine** (`quarantine`): exclusive ownership of capture files
//! - **Encryption** (`encryption`): per-record AES-256-GCM sealing
//! - **Queue store** (`queue_store`): SQLite persistence with corruption isolation
//! - **Retry policy** (`retry`): failure classification and exponential backoff
//! - **Intake** (`intake`): all-or-nothing enqueue
//! - **Engine** (`engine`): coalescing single-writer upload passes
//! - **Triggers** (`trigger`): wiring of wake-up sources into the engine

pub mod encryption;
pub mod engine;
pub mod error;
pub mod intake;
pub mod item;
pub mod quarantine;
pub mod queue_store;
pub mod retry;
pub mod trigger;

pub use encryption::{RecordCipher, RecordKey};
pub use engine::{EngineDeps, PassOutcome, PassSummary, QueueStatus, RunOutcome, SyncEngine};
pub use error::{Result, SyncError};
pub use intake::CaptureIntake;
pub use item::{CaptureRequest, LastError, MediaKind, QueueItem, QueueItemId};
pub use quarantine::{OwnedFile, QuarantineStore};
pub use queue_store::{QueueStore, SqliteQueueStore};
pub use retry::{classify, Disposition, RetryPolicy};
pub use trigger::{TriggerCoordinator, TriggerSettings, TriggerSource};
