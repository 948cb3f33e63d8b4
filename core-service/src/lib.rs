//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (identity, remote
//! stores, secure storage, file system, connectivity, scheduling) into the
//! capture upload core. Desktop apps typically enable the `desktop-shims`
//! feature, which lets [`CoreConfig`] fall back to the keyring and tokio
//! file system adapters from `bridge-desktop`.
//!
//! ```ignore
//! use core_service::{CaptureRequest, CoreConfig, MediaKind, UploadService};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/app/upload_queue.db")
//!     .quarantine_dir("/data/app/captures")
//!     .identity_provider(identity)
//!     .object_store(objects)
//!     .metadata_store(documents)
//!     .build()?;
//!
//! let service = UploadService::bootstrap(config).await?;
//! let id = service
//!     .enqueue(CaptureRequest::new(temp_path, MediaKind::Photo, user_id))
//!     .await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use bridge_traits::remote::GeoPoint;
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};
pub use core_runtime::events::{CoreEvent, EventStream, QueueEvent, UploadEvent};
pub use core_sync::{
    CaptureRequest, MediaKind, QueueItem, QueueItemId, QueueStatus, RunOutcome, TriggerSource,
};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use core_runtime::events::EventBus;
use core_sync::{
    CaptureIntake, EngineDeps, QuarantineStore, QueueStore, RecordKey, RetryPolicy,
    SqliteQueueStore, SyncEngine, TriggerCoordinator, TriggerSettings,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Capacity of the service event bus.
const EVENT_BUS_CAPACITY: usize = 256;

/// Primary façade exposed to host applications.
///
/// Cheap to clone; all clones drive the same queue and engine.
#[derive(Clone)]
pub struct UploadService {
    store: Arc<SqliteQueueStore>,
    engine: Arc<SyncEngine>,
    intake: Arc<CaptureIntake>,
    triggers: TriggerCoordinator,
    event_bus: EventBus,
}

impl UploadService {
    /// Open the queue, sweep orphaned files and start the wake-up sources.
    ///
    /// Must be called from within a tokio runtime. No capture is accepted
    /// before the orphan sweep has finished.
    #[instrument(skip_all)]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CoreError::InitializationFailed(format!("no tokio runtime: {}", e)))?;
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

        let key =
            RecordKey::load_or_create(config.secure_store.as_ref(), &config.record_key_name)
                .await?;
        let store = Arc::new(
            SqliteQueueStore::open(&config.database_path, &key, Some(event_bus.clone())).await?,
        );

        let quarantine = Arc::new(QuarantineStore::new(
            config.quarantine_dir.clone(),
            config.file_system.clone(),
        ));
        quarantine.init().await?;

        let live: HashSet<PathBuf> = store
            .list()
            .await?
            .into_iter()
            .map(|item| item.owned_file_path)
            .collect();
        let removed = quarantine.sweep_orphans(&live).await?;
        if removed > 0 {
            let _ = event_bus.emit(CoreEvent::Queue(QueueEvent::OrphansSwept { removed }));
        }

        let network_monitor = if config.features.enable_network_awareness {
            config.network_monitor.clone()
        } else {
            None
        };
        let executor = if config.features.enable_background_sync {
            config.background_executor.clone()
        } else {
            None
        };

        let engine = Arc::new(SyncEngine::new(
            EngineDeps {
                store: store.clone(),
                quarantine: quarantine.clone(),
                identity_provider: config.identity_provider.clone(),
                object_store: config.object_store.clone(),
                metadata_store: config.metadata_store.clone(),
                network_monitor: network_monitor.clone(),
                clock: config.clock.clone(),
                event_bus: event_bus.clone(),
            },
            RetryPolicy::new(&config.retry),
            config.timeouts,
        ));
        let pending = engine.refresh_status().await?;

        let intake = Arc::new(CaptureIntake::new(
            quarantine,
            store.clone(),
            config.clock.clone(),
            event_bus.clone(),
        ));

        let triggers = TriggerCoordinator::new(
            engine.clone(),
            runtime,
            executor,
            network_monitor,
            TriggerSettings {
                periodic_interval: config.periodic_interval,
                global_retry_delay: config.retry.global_retry_delay,
            },
        );
        triggers.start().await?;

        info!(
            pending,
            orphans_removed = removed,
            background_sync = config.features.enable_background_sync,
            network_awareness = config.features.enable_network_awareness,
            "Upload service ready"
        );

        Ok(Self {
            store,
            engine,
            intake,
            triggers,
            event_bus,
        })
    }

    /// Quarantine a finished capture and queue it for upload.
    ///
    /// Returns as soon as the record is durable; the upload itself runs on a
    /// background pass.
    pub async fn enqueue(&self, request: CaptureRequest) -> Result<QueueItemId> {
        if self.triggers.is_shut_down() {
            return Err(CoreError::ShutDown);
        }

        let id = self.intake.enqueue(request).await?;
        if let Err(e) = self.engine.refresh_status().await {
            warn!(error = %e, "Could not refresh queue status");
        }
        self.triggers.trigger(TriggerSource::Manual);
        Ok(id)
    }

    /// Request a pass without waiting for it.
    pub fn trigger(&self, source: TriggerSource) {
        self.triggers.trigger(source);
    }

    /// Request a pass and wait for its outcome. `None` after shutdown.
    pub async fn trigger_and_wait(&self, source: TriggerSource) -> Option<RunOutcome> {
        self.triggers.trigger_and_wait(source).await
    }

    /// Aggregate queue state, updated after every enqueue and pass.
    pub fn status(&self) -> watch::Receiver<QueueStatus> {
        self.engine.subscribe_status()
    }

    /// Pending items, oldest first.
    pub async fn pending_items(&self) -> Result<Vec<QueueItem>> {
        Ok(self.store.list().await?)
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Stop the wake-up sources, let a running pass finish and close the queue.
    pub async fn shutdown(&self) {
        self.triggers.shutdown().await;

        let mut status = self.engine.subscribe_status();
        if status.wait_for(|s| !s.running).await.is_err() {
            warn!("Status channel closed during shutdown");
        }

        self.store.close().await;
        info!("Upload service stopped");
    }
}
