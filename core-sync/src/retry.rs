//! # Error Classification & Retry Policy
//!
//! Pure decision logic: which failures end an item, which are retried later,
//! and which stop a whole pass. Delays are computed from the attempt count
//! only, so they can be checked against any injected clock.

use bridge_traits::error::AuthFailure;
use chrono::{DateTime, Utc};
use core_runtime::config::RetrySettings;
use std::time::Duration;

use crate::error::SyncError;
use crate::item::QueueItem;

const THROTTLED_KIND: &str = "storage_throttled";

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Drop the item and its file; retrying cannot succeed.
    Permanent,
    /// Keep the item and retry after a backoff.
    Transient,
    /// Stop the pass without touching the item.
    GlobalAbort,
}

/// Map a failure to its disposition.
pub fn classify(error: &SyncError) -> Disposition {
    match error {
        SyncError::FileMissing { .. } | SyncError::Validation(_) | SyncError::Rejected(_) => {
            Disposition::Permanent
        }
        SyncError::Unauthorized { kind, .. } => match kind {
            AuthFailure::Forbidden => Disposition::Permanent,
            AuthFailure::RefreshPending => Disposition::Transient,
            AuthFailure::Revoked => Disposition::GlobalAbort,
        },
        SyncError::NoIdentity | SyncError::Offline => Disposition::GlobalAbort,
        SyncError::NetworkTransient(_)
        | SyncError::StorageThrottled(_)
        | SyncError::Timeout { .. }
        | SyncError::Database(_)
        | SyncError::Encryption(_)
        | SyncError::StoreCorrupted(_)
        | SyncError::Io(_) => Disposition::Transient,
    }
}

/// Exponential backoff with a cap.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    throttle_multiplier: u32,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            throttle_multiplier: settings.throttle_multiplier.max(1),
        }
    }

    /// Delay before attempt `attempts + 1`: `base * 2^(attempts - 1)`, capped.
    /// No delay before the first attempt.
    pub fn backoff(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempts - 1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Backoff for an item whose last failure was throttling.
    pub fn throttled_backoff(&self, attempts: u32) -> Duration {
        self.backoff(attempts)
            .checked_mul(self.throttle_multiplier)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Backoff appropriate for the item's recorded history.
    pub fn delay_for(&self, item: &QueueItem) -> Duration {
        let throttled = item
            .last_error
            .as_ref()
            .map_or(false, |e| e.kind == THROTTLED_KIND);
        if throttled {
            self.throttled_backoff(item.upload_attempts)
        } else {
            self.backoff(item.upload_attempts)
        }
    }

    /// When the item may next be attempted. `None` means immediately.
    pub fn next_attempt_at(&self, item: &QueueItem) -> Option<DateTime<Utc>> {
        let last = item.last_attempt_at?;
        let delay = chrono::Duration::from_std(self.delay_for(item)).ok()?;
        last.checked_add_signed(delay)
    }

    pub fn is_due(&self, item: &QueueItem, now: DateTime<Utc>) -> bool {
        self.next_attempt_at(item).map_or(true, |at| now >= at)
    }
}
