//! # Sync Engine
//!
//! Walks the upload queue and reconciles it with the remote stores.
//!
//! ## Overview
//!
//! One pass:
//! 1. Take the in-progress guard, or flag a rerun and return if a pass is
//!    already running.
//! 2. Snapshot the queue, oldest first.
//! 3. Check connectivity and identity once; if either is missing the pass
//!    aborts before touching any item.
//! 4. Process items one at a time: skip those still backing off or owned by
//!    another account, upload the file under `captures/<id>.<ext>`, write
//!    the metadata document under `<id>`, then remove the record and the
//!    quarantined file.
//! 5. Release the guard, or run again if a trigger arrived meanwhile.
//!
//! Failures are classified per item by [`classify`](crate::retry::classify).
//! Results are published on the event bus and through a `watch` channel;
//! nothing is returned to the caller as an error.
//!
//! ## State Machine
//!
//! ```text
//!          run()                     pass done, no rerun
//!   Idle ─────────> Running ───────────────────────────> Idle
//!                    │   ▲
//!                    └───┘ pass done, rerun requested
//! ```

use bridge_traits::identity::{Identity, IdentityProvider};
use bridge_traits::network::{NetworkMonitor, NetworkStatus};
use bridge_traits::remote::{MediaDocument, MetadataStore, ObjectStore};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::OperationTimeouts;
use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::item::QueueItem;
use crate::quarantine::QuarantineStore;
use crate::queue_store::QueueStore;
use crate::retry::{classify, Disposition, RetryPolicy};

/// Aggregate queue state for hosts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStatus {
    /// Items still waiting to be uploaded
    pub pending: u64,
    /// Whether a pass is currently running
    pub running: bool,
    /// Most recent failure the user should see (permanent drops only)
    pub last_error: Option<String>,
    pub last_pass_at: Option<DateTime<Utc>>,
    /// Reason the most recent pass was aborted, cleared by a completed pass
    pub last_abort: Option<String>,
}

/// Counters for one completed pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub uploaded: u64,
    pub dropped: u64,
    /// Transient failures kept for a later attempt
    pub retried: u64,
    /// Items not attempted (backing off or owned by another account)
    pub skipped: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed(PassSummary),
    /// The pass stopped before or between items; no item was mutated by the stop.
    Aborted { reason: SyncError },
}

/// Result of asking the engine to run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A pass was already running; it will run once more when it finishes.
    Coalesced,
    /// This call ran `passes` passes back to back; `last` is the final one.
    Ran { passes: u32, last: PassOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Running { rerun_requested: bool },
}

/// Collaborators the engine drives.
pub struct EngineDeps {
    pub store: Arc<dyn QueueStore>,
    pub quarantine: Arc<QuarantineStore>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub object_store: Arc<dyn ObjectStore>,
    pub metadata_store: Arc<dyn MetadataStore>,
    /// When absent, connectivity is not checked up front.
    pub network_monitor: Option<Arc<dyn NetworkMonitor>>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,
}

pub struct SyncEngine {
    store: Arc<dyn QueueStore>,
    quarantine: Arc<QuarantineStore>,
    identity_provider: Arc<dyn IdentityProvider>,
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    policy: RetryPolicy,
    timeouts: OperationTimeouts,
    state: Mutex<EngineState>,
    status: watch::Sender<QueueStatus>,
    passes_run: AtomicU64,
}

/// Returns the engine to `Idle` even if a pass panics.
struct RunningGuard<'a> {
    engine: &'a SyncEngine,
    released: bool,
}

impl RunningGuard<'_> {
    /// Either consume a pending rerun request (returns `true`) or go idle.
    fn finish_or_rerun(&mut self) -> bool {
        let mut state = self.engine.lock_state();
        if let EngineState::Running { rerun_requested } = &mut *state {
            if *rerun_requested {
                *rerun_requested = false;
                return true;
            }
        }
        *state = EngineState::Idle;
        self.engine.status.send_modify(|s| s.running = false);
        self.released = true;
        false
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            let mut state = self.engine.lock_state();
            *state = EngineState::Idle;
            self.engine.status.send_modify(|s| s.running = false);
        }
    }
}

impl SyncEngine {
    pub fn new(deps: EngineDeps, policy: RetryPolicy, timeouts: OperationTimeouts) -> Self {
        let (status, _) = watch::channel(QueueStatus::default());
        Self {
            store: deps.store,
            quarantine: deps.quarantine,
            identity_provider: deps.identity_provider,
            object_store: deps.object_store,
            metadata_store: deps.metadata_store,
            network_monitor: deps.network_monitor,
            clock: deps.clock,
            event_bus: deps.event_bus,
            policy,
            timeouts,
            state: Mutex::new(EngineState::Idle),
            status,
            passes_run: AtomicU64::new(0),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<QueueStatus> {
        self.status.subscribe()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_state(), EngineState::Running { .. })
    }

    /// Total passes executed since construction.
    pub fn passes_run(&self) -> u64 {
        self.passes_run.load(Ordering::SeqCst)
    }

    /// Re-read the pending count into the status channel.
    pub async fn refresh_status(&self) -> Result<u64> {
        let pending = self.store.count().await?;
        self.status.send_modify(|s| s.pending = pending);
        Ok(pending)
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_begin(&self) -> bool {
        let mut state = self.lock_state();
        if let EngineState::Running { rerun_requested } = &mut *state {
            *rerun_requested = true;
            return false;
        }
        *state = EngineState::Running {
            rerun_requested: false,
        };
        self.status.send_modify(|s| s.running = true);
        true
    }

    /// Run passes until no rerun is pending, or coalesce into the running one.
    pub async fn run(&self) -> RunOutcome {
        if !self.try_begin() {
            debug!("Pass already running; rerun requested");
            return RunOutcome::Coalesced;
        }

        let mut guard = RunningGuard {
            engine: self,
            released: false,
        };
        let mut passes = 0u32;
        loop {
            let outcome = self.run_pass().await;
            passes += 1;
            if !guard.finish_or_rerun() {
                return RunOutcome::Ran {
                    passes,
                    last: outcome,
                };
            }
            debug!("Running coalesced pass");
        }
    }

    #[instrument(skip(self), fields(pass_id = tracing::field::Empty))]
    async fn run_pass(&self) -> PassOutcome {
        let pass_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("pass_id", pass_id.as_str());
        self.passes_run.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let snapshot = match self.store.list().await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Could not read the upload queue");
                return self.abort_pass(&pass_id, e).await;
            }
        };

        self.emit(UploadEvent::PassStarted {
            pass_id: pass_id.clone(),
            pending: snapshot.len() as u64,
        });

        if snapshot.is_empty() {
            return self.complete_pass(&pass_id, PassSummary::default(), started).await;
        }

        let identity = match self.check_preconditions().await {
            Ok(identity) => identity,
            Err(reason) => return self.abort_pass(&pass_id, reason).await,
        };

        let mut summary = PassSummary::default();
        for item in snapshot {
            let now = self.clock.now();
            if !self.policy.is_due(&item, now) {
                debug!(queue_item_id = %item.id, attempts = item.upload_attempts, "Item still backing off");
                summary.skipped += 1;
                continue;
            }
            if item.owner_id != identity.user_id {
                debug!(queue_item_id = %item.id, "Item belongs to another account; deferring");
                summary.skipped += 1;
                continue;
            }

            match self.upload_item(&item, &identity).await {
                Ok(object_key) => {
                    self.finish_item(&item, object_key).await;
                    summary.uploaded += 1;
                }
                Err(e) => match classify(&e) {
                    Disposition::Permanent => {
                        self.drop_item(&item, &e).await;
                        summary.dropped += 1;
                    }
                    Disposition::Transient => {
                        self.schedule_retry(item, &e).await;
                        summary.retried += 1;
                    }
                    Disposition::GlobalAbort => {
                        warn!(queue_item_id = %item.id, error = %e, "Pass aborted mid-queue");
                        return self.abort_pass(&pass_id, e).await;
                    }
                },
            }
        }

        self.complete_pass(&pass_id, summary, started).await
    }

    /// Connectivity (when monitored) and identity, checked once per pass.
    async fn check_preconditions(&self) -> Result<Identity> {
        if let Some(monitor) = &self.network_monitor {
            match monitor.get_network_info().await {
                Ok(info) if info.status == NetworkStatus::Disconnected => {
                    return Err(SyncError::Offline)
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Network status unknown; continuing"),
            }
        }

        match self.identity_provider.current_identity().await {
            Ok(Some(identity)) => Ok(identity),
            Ok(None) => Err(SyncError::NoIdentity),
            Err(e) => Err(e.into()),
        }
    }

    /// Object upload then document write, both keyed by the item id.
    async fn upload_item(&self, item: &QueueItem, identity: &Identity) -> Result<String> {
        item.validate()?;
        if !self.quarantine.owns(&item.owned_file_path) {
            return Err(SyncError::Validation(
                "owned file is outside the quarantine directory".to_string(),
            ));
        }

        let data = self.quarantine.read(&item.owned_file_path).await?;
        let sha256 = hex::encode(Sha256::digest(&data));
        let size_bytes = data.len() as u64;
        let object_key = item.object_key();
        let content_type = item.media_kind.content_type();

        let media_url = with_timeout(
            "object upload",
            self.timeouts.upload,
            self.object_store.put(&object_key, data, content_type),
        )
        .await?;

        let document = MediaDocument {
            id: item.id.to_string(),
            owner_id: identity.user_id.clone(),
            media_kind: item.media_kind.as_str().to_string(),
            media_url,
            content_type: content_type.to_string(),
            size_bytes,
            sha256,
            caption: item.caption.clone(),
            location: item.location,
            filter_tag: item.filter_tag.clone(),
            captured_at: item.created_at,
        };

        with_timeout(
            "document write",
            self.timeouts.document,
            self.metadata_store
                .create_or_replace(&item.id.to_string(), document),
        )
        .await?;

        Ok(object_key)
    }

    async fn finish_item(&self, item: &QueueItem, object_key: String) {
        match self.store.remove(&item.id).await {
            Ok(_) => {
                // The record is gone, so nothing will read the file again.
                if let Err(e) = self.quarantine.release(&item.owned_file_path).await {
                    warn!(queue_item_id = %item.id, error = %e, "Uploaded file could not be deleted");
                }
                info!(queue_item_id = %item.id, "Capture uploaded");
                self.emit(UploadEvent::ItemUploaded {
                    item_id: item.id.to_string(),
                    object_key,
                });
            }
            Err(e) => {
                // Kept with its file; the next pass repeats the idempotent writes.
                warn!(queue_item_id = %item.id, error = %e, "Uploaded item could not be removed");
            }
        }
    }

    async fn drop_item(&self, item: &QueueItem, cause: &SyncError) {
        error!(
            queue_item_id = %item.id,
            error_kind = cause.kind(),
            "Dropping capture after permanent failure"
        );

        if let Err(e) = self.store.remove(&item.id).await {
            warn!(queue_item_id = %item.id, error = %e, "Failed to remove dropped item");
            return;
        }
        if let Err(e) = self.quarantine.release(&item.owned_file_path).await {
            warn!(queue_item_id = %item.id, error = %e, "Dropped item's file could not be deleted");
        }

        let message = cause.to_string();
        self.status
            .send_modify(|s| s.last_error = Some(message.clone()));
        self.emit(UploadEvent::ItemDropped {
            item_id: item.id.to_string(),
            error_kind: cause.kind().to_string(),
            message,
        });
    }

    async fn schedule_retry(&self, mut item: QueueItem, cause: &SyncError) {
        item.record_failure(cause, self.clock.now());
        let retry_in = self.policy.delay_for(&item);

        warn!(
            queue_item_id = %item.id,
            attempts = item.upload_attempts,
            retry_in_secs = retry_in.as_secs(),
            error_kind = cause.kind(),
            "Upload failed; will retry"
        );

        match self.store.update(&item).await {
            Ok(true) => self.emit(UploadEvent::ItemRetryScheduled {
                item_id: item.id.to_string(),
                attempts: item.upload_attempts,
                retry_in_secs: retry_in.as_secs(),
                error_kind: cause.kind().to_string(),
            }),
            Ok(false) => debug!(queue_item_id = %item.id, "Item vanished before retry bookkeeping"),
            Err(e) => warn!(queue_item_id = %item.id, error = %e, "Failed to record retry"),
        }
    }

    async fn abort_pass(&self, pass_id: &str, reason: SyncError) -> PassOutcome {
        warn!(reason = %reason, "Upload pass aborted");
        let pending = self.store.count().await.ok();
        let now = self.clock.now();
        let message = reason.to_string();
        self.status.send_modify(|s| {
            if let Some(pending) = pending {
                s.pending = pending;
            }
            s.last_pass_at = Some(now);
            s.last_abort = Some(message.clone());
        });
        self.emit(UploadEvent::PassAborted {
            pass_id: pass_id.to_string(),
            reason: message,
        });
        PassOutcome::Aborted { reason }
    }

    async fn complete_pass(
        &self,
        pass_id: &str,
        summary: PassSummary,
        started: Instant,
    ) -> PassOutcome {
        let counted = match self.store.count().await {
            Ok(pending) => Some(pending),
            Err(e) => {
                warn!(error = %e, "Could not count pending items");
                None
            }
        };
        let now = self.clock.now();
        let mut pending = 0;
        self.status.send_modify(|s| {
            if let Some(counted) = counted {
                s.pending = counted;
            }
            s.last_pass_at = Some(now);
            s.last_abort = None;
            pending = s.pending;
        });

        info!(
            uploaded = summary.uploaded,
            dropped = summary.dropped,
            retried = summary.retried,
            skipped = summary.skipped,
            pending,
            "Upload pass completed"
        );
        self.emit(UploadEvent::PassCompleted {
            pass_id: pass_id.to_string(),
            uploaded: summary.uploaded,
            dropped: summary.dropped,
            deferred: summary.retried + summary.skipped,
            pending,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        PassOutcome::Completed(summary)
    }

    fn emit(&self, event: UploadEvent) {
        let _ = self.event_bus.emit(CoreEvent::Upload(event));
    }
}

/// Bound a remote call; running out of time is a transient failure.
async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = bridge_traits::error::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::Timeout {
            operation: operation.to_string(),
            after_secs: limit.as_secs(),
        }),
    }
}
