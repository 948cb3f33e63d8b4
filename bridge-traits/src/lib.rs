//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the upload core and the host.
//! Each trait represents a capability the core requires but that is
//! implemented differently per platform (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Remote collaborators
//! - [`ObjectStore`](remote::ObjectStore) - Idempotent media upload keyed by object key
//! - [`MetadataStore`](remote::MetadataStore) - Create-or-replace document writes
//! - [`IdentityProvider`](identity::IdentityProvider) - Currently signed-in user
//!
//! ### Storage
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the quarantine directory
//! - [`SecureStore`](storage::SecureStore) - Record key persistence (Keychain/Keystore)
//!
//! ### Platform Integration
//! - [`NetworkMonitor`](network::NetworkMonitor) - Connectivity and change notifications
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Periodic and one-shot wake-ups
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! let object_store = config.object_store
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "ObjectStore".to_string(),
//!         message: "No object store provided. Inject the host upload client.".to_string(),
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Remote bridges
//! must pick the variant that matches the failure (`Timeout`, `Throttled`,
//! `Unauthorized`, `Rejected`), because the sync engine decides between
//! retrying and dropping an item based on it.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod background;
pub mod error;
pub mod identity;
pub mod network;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::{AuthFailure, BridgeError};

// Re-export commonly used types
pub use background::{BackgroundExecutor, TaskConstraints, TaskHandler, TaskId, TaskStatus};
pub use identity::{Identity, IdentityProvider};
pub use network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
pub use remote::{GeoPoint, MediaDocument, MetadataStore, ObjectStore};
pub use storage::{FileMetadata, FileSystemAccess, SecureStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
