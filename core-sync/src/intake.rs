//! Capture intake: the single entry point that puts a capture on the queue.
//!
//! Enqueue is all-or-nothing. The file is quarantined first; if the record
//! cannot be written the file is handed back to where it came from (or
//! deleted when that fails), so a failed enqueue leaves neither a record
//! nor an orphaned file.

use bridge_traits::time::Clock;
use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::item::{CaptureRequest, QueueItem, QueueItemId};
use crate::quarantine::QuarantineStore;
use crate::queue_store::QueueStore;

pub struct CaptureIntake {
    quarantine: Arc<QuarantineStore>,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl CaptureIntake {
    pub fn new(
        quarantine: Arc<QuarantineStore>,
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            quarantine,
            store,
            clock,
            event_bus,
        }
    }

    /// Take ownership of the capture file and record it as pending.
    ///
    /// Returns `FileMissing` if the capture file is already gone, in which
    /// case nothing is recorded.
    #[instrument(skip_all, fields(media_kind = %request.media_kind))]
    pub async fn enqueue(&self, request: CaptureRequest) -> Result<QueueItemId> {
        request.validate()?;

        let owned = self
            .quarantine
            .intake(&request.source_path, request.media_kind)
            .await?;
        let item = QueueItem::from_request(
            owned.id,
            owned.path.clone(),
            &request,
            self.clock.now(),
        );

        if let Err(e) = self.store.add(&item).await {
            error!(queue_item_id = %item.id, error = %e, "Queue write failed; rolling back intake");
            if let Err(restore_err) = self.quarantine.restore(&owned, &request.source_path).await {
                error!(queue_item_id = %item.id, error = %restore_err, "Rollback left no usable file");
            }
            return Err(e);
        }

        let pending = self.store.count().await.unwrap_or(0);
        info!(queue_item_id = %item.id, pending, "Capture queued");
        let _ = self.event_bus.emit(CoreEvent::Queue(QueueEvent::Enqueued {
            item_id: item.id.to_string(),
            media_kind: item.media_kind.as_str().to_string(),
            pending,
        }));

        Ok(item.id)
    }
}
