//! # Trigger Coordinator
//!
//! Funnels every wake-up source into the engine's single coalescing entry
//! point:
//!
//! - connectivity regained (edge on the network change stream)
//! - periodic ticks from the background executor
//! - manual requests, typically right after an enqueue
//! - the one-shot retry requested after a globally aborted pass
//!
//! Passes always run on a background task; callers never wait on the
//! network unless they use [`TriggerCoordinator::trigger_and_wait`].

use bridge_traits::background::{BackgroundExecutor, TaskConstraints, TaskHandler, TaskId};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::network::{NetworkChangeStream, NetworkMonitor};
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{PassOutcome, RunOutcome, SyncEngine};
use crate::error::Result;

/// Executor task id of the periodic wake-up.
pub const PERIODIC_TASK_ID: &str = "capture_upload_periodic";
/// Executor task id of the delayed retry after an aborted pass.
pub const RETRY_TASK_ID: &str = "capture_upload_retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Connectivity,
    Periodic,
    Manual,
    Retry,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connectivity => "connectivity",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
            Self::Retry => "retry",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerSettings {
    pub periodic_interval: Duration,
    /// Delay before retrying a pass that aborted for lack of identity or connectivity
    pub global_retry_delay: Duration,
}

struct Inner {
    engine: Arc<SyncEngine>,
    runtime: Handle,
    executor: Option<Arc<dyn BackgroundExecutor>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    settings: TriggerSettings,
    shutdown: CancellationToken,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    /// Runtime timer standing in for the executor's one-shot retry; at most one is pending.
    retry_timer: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TriggerCoordinator {
    inner: Arc<Inner>,
}

impl TriggerCoordinator {
    pub fn new(
        engine: Arc<SyncEngine>,
        runtime: Handle,
        executor: Option<Arc<dyn BackgroundExecutor>>,
        network_monitor: Option<Arc<dyn NetworkMonitor>>,
        settings: TriggerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                runtime,
                executor,
                network_monitor,
                settings,
                shutdown: CancellationToken::new(),
                watchers: Mutex::new(Vec::new()),
                retry_timer: Mutex::new(None),
            }),
        }
    }

    /// Register executor handlers, schedule the periodic wake-up and start
    /// watching connectivity.
    pub async fn start(&self) -> Result<()> {
        if let Some(executor) = &self.inner.executor {
            executor
                .register_handler(PERIODIC_TASK_ID, self.handler(TriggerSource::Periodic))
                .await?;
            executor
                .register_handler(RETRY_TASK_ID, self.handler(TriggerSource::Retry))
                .await?;
            executor
                .schedule_task(
                    PERIODIC_TASK_ID,
                    self.inner.settings.periodic_interval,
                    TaskConstraints::default(),
                )
                .await?;
            info!(
                interval_secs = self.inner.settings.periodic_interval.as_secs(),
                "Periodic upload wake-up scheduled"
            );
        }

        if let Some(monitor) = &self.inner.network_monitor {
            let stream = monitor.subscribe_changes().await?;
            let weak = Arc::downgrade(&self.inner);
            let shutdown = self.inner.shutdown.clone();
            let handle = self
                .inner
                .runtime
                .spawn(watch_connectivity(weak, stream, shutdown));
            self.inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }

        Ok(())
    }

    /// Request a pass. Returns immediately; coalesces with a running pass.
    pub fn trigger(&self, source: TriggerSource) {
        let _ = self.inner.spawn_run(source);
    }

    /// Request a pass and wait for the outcome of this request.
    ///
    /// Returns `None` after shutdown or if the pass task panicked.
    pub async fn trigger_and_wait(&self, source: TriggerSource) -> Option<RunOutcome> {
        let handle = self.inner.spawn_run(source)?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(error = %e, "Upload pass task failed");
                None
            }
        }
    }

    /// Stop accepting triggers and cancel scheduled wake-ups. A pass that is
    /// already running finishes its current item and the rest of its snapshot.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        if let Some(executor) = &self.inner.executor {
            for id in [PERIODIC_TASK_ID, RETRY_TASK_ID] {
                if let Err(e) = executor.cancel_task(&TaskId::new(id)).await {
                    debug!(task_id = id, error = %e, "Nothing to cancel");
                }
            }
        }

        let watchers = std::mem::take(
            &mut *self
                .inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in watchers {
            handle.abort();
        }
        if let Some(timer) = self
            .inner
            .retry_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
        info!("Trigger coordinator stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn handler(&self, source: TriggerSource) -> TaskHandler {
        let weak = Arc::downgrade(&self.inner);
        Arc::new(move || -> BoxFuture<'static, BridgeResult<()>> {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    let _ = inner.spawn_run(source);
                }
                Ok(())
            })
        })
    }
}

impl Inner {
    fn spawn_run(self: &Arc<Self>, source: TriggerSource) -> Option<JoinHandle<RunOutcome>> {
        if self.shutdown.is_cancelled() {
            debug!(%source, "Trigger ignored after shutdown");
            return None;
        }
        debug!(%source, "Upload pass requested");

        let inner = Arc::clone(self);
        Some(self.runtime.spawn(async move {
            let outcome = inner.engine.run().await;
            if let RunOutcome::Ran {
                last: PassOutcome::Aborted { reason },
                ..
            } = &outcome
            {
                debug!(%reason, "Scheduling retry after aborted pass");
                inner.schedule_retry().await;
            }
            outcome
        }))
    }

    async fn schedule_retry(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let delay = self.settings.global_retry_delay;

        match &self.executor {
            Some(executor) => {
                if let Err(e) = executor
                    .schedule_once(RETRY_TASK_ID, delay, TaskConstraints::default())
                    .await
                {
                    warn!(error = %e, "Failed to schedule upload retry");
                }
            }
            None => {
                // No scheduler: keep a timer on the runtime instead. A new
                // retry replaces the pending one, as a re-scheduled task id does.
                let weak = Arc::downgrade(self);
                let shutdown = self.shutdown.clone();
                let timer = self.runtime.spawn(async move {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            if let Some(inner) = weak.upgrade() {
                                let _ = inner.spawn_run(TriggerSource::Retry);
                            }
                        }
                    }
                });
                let previous = self
                    .retry_timer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .replace(timer);
                if let Some(previous) = previous {
                    previous.abort();
                }
            }
        }
    }
}

/// Trigger on every offline-to-online edge.
async fn watch_connectivity(
    inner: Weak<Inner>,
    mut stream: Box<dyn NetworkChangeStream>,
    shutdown: CancellationToken,
) {
    let mut was_connected: Option<bool> = None;
    loop {
        let info = tokio::select! {
            _ = shutdown.cancelled() => break,
            info = stream.next() => info,
        };
        let Some(info) = info else { break };

        let connected = info.is_connected();
        if connected && was_connected != Some(true) {
            info!("Connectivity regained; triggering upload pass");
            match inner.upgrade() {
                Some(inner) => {
                    let _ = inner.spawn_run(TriggerSource::Connectivity);
                }
                None => break,
            }
        }
        was_connected = Some(connected);
    }
    debug!("Connectivity watcher stopped");
}
