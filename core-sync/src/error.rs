use bridge_traits::error::{AuthFailure, BridgeError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Capture file missing: {path}")]
    FileMissing { path: String },

    #[error("Unauthorized ({kind:?}): {message}")]
    Unauthorized { kind: AuthFailure, message: String },

    #[error("No signed-in identity")]
    NoIdentity,

    #[error("No network connection")]
    Offline,

    #[error("Network error: {0}")]
    NetworkTransient(String),

    #[error("Remote storage throttled: {0}")]
    StorageThrottled(String),

    #[error("{operation} timed out after {after_secs} seconds")]
    Timeout { operation: String, after_secs: u64 },

    #[error("Invalid queue item: {0}")]
    Validation(String),

    #[error("Remote rejected the capture: {0}")]
    Rejected(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Queue store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl SyncError {
    /// Stable snake_case name, persisted as `last_error.kind` and carried on events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FileMissing { .. } => "file_missing",
            Self::Unauthorized { kind, .. } => match kind {
                AuthFailure::Forbidden => "unauthorized_forbidden",
                AuthFailure::RefreshPending => "unauthorized_refresh_pending",
                AuthFailure::Revoked => "unauthorized_revoked",
            },
            Self::NoIdentity => "no_identity",
            Self::Offline => "offline",
            Self::NetworkTransient(_) => "network_transient",
            Self::StorageThrottled(_) => "storage_throttled",
            Self::Timeout { .. } => "timeout",
            Self::Validation(_) => "validation",
            Self::Rejected(_) => "rejected",
            Self::Database(_) => "database",
            Self::Encryption(_) => "encryption",
            Self::StoreCorrupted(_) => "store_corrupted",
            Self::Io(_) => "io",
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Offline => Self::Offline,
            BridgeError::Timeout(operation) => Self::Timeout {
                operation,
                after_secs: 0,
            },
            BridgeError::Throttled(msg) => Self::StorageThrottled(msg),
            BridgeError::Unauthorized { kind, message } => Self::Unauthorized { kind, message },
            BridgeError::Rejected(msg) => Self::Rejected(msg),
            BridgeError::OperationFailed(msg) => Self::NetworkTransient(msg),
            BridgeError::NotAvailable(msg) => Self::Io(msg),
            BridgeError::Io(e) => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
