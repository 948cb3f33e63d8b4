use thiserror::Error;

/// Sub-cause of an authorization failure reported by a host bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The caller is not allowed to perform the write; retrying will not help.
    Forbidden,
    /// Credentials are being refreshed; the same request should succeed later.
    RefreshPending,
    /// The session was revoked; nothing can be written until the user signs in again.
    Revoked,
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("No network connection")]
    Offline,

    #[error("Remote operation timed out: {0}")]
    Timeout(String),

    #[error("Remote storage throttled the request: {0}")]
    Throttled(String),

    #[error("Unauthorized ({kind:?}): {message}")]
    Unauthorized { kind: AuthFailure, message: String },

    #[error("Remote rejected the payload: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
