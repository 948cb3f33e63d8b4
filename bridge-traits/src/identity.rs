//! Identity Abstraction
//!
//! The core never signs users in; it only asks the host who is signed in
//! right now and with which credential.

use std::fmt;

use crate::error::Result;

/// Signed-in user as seen by the host's auth subsystem.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    /// Bearer credential forwarded by host remote-store bridges. Never logged.
    pub token: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Identity provider trait
///
/// Returns `Ok(None)` when nobody is signed in. Callers treat that as a
/// reason to stop all uploads, not as an error of any particular item.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_identity(&self) -> Result<Option<Identity>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let identity = Identity::new("user-1", "secret-token");
        let rendered = format!("{:?}", identity);

        assert!(rendered.contains("user-1"));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
