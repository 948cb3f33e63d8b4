//! Background Task Execution Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{BackgroundExecutor, TaskConstraints, TaskHandler, TaskId, TaskStatus},
    error::{BridgeError, Result},
    network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How long a one-shot task waits before re-checking unmet constraints.
const CONSTRAINT_RETRY: Duration = Duration::from_secs(5);

type TaskTable = Arc<RwLock<HashMap<TaskId, TaskInfo>>>;

/// Tokio-based background executor for desktop.
pub struct TokioBackgroundExecutor {
    tasks: TaskTable,
    handlers: Arc<RwLock<HashMap<String, TaskHandler>>>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
}

struct TaskInfo {
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
    cancel: Option<oneshot::Sender<()>>,
}

#[derive(Clone, Copy)]
enum Schedule {
    Recurring(Duration),
    Once(Duration),
}

impl TokioBackgroundExecutor {
    /// Create a new background executor with no network monitoring.
    pub fn new() -> Self {
        Self::with_network_monitor(None)
    }

    /// Create a background executor that checks network constraints against `monitor`.
    pub fn with_network_monitor(monitor: Option<Arc<dyn NetworkMonitor>>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            network_monitor: monitor,
        }
    }

    async fn handler_for(&self, task_id: &str) -> Result<TaskHandler> {
        let handlers = self.handlers.read().await;
        handlers.get(task_id).cloned().ok_or_else(|| {
            BridgeError::OperationFailed(format!("No handler registered for task: {}", task_id))
        })
    }

    async fn set_status(tasks: &TaskTable, id: &TaskId, status: TaskStatus) {
        let mut tasks = tasks.write().await;
        if let Some(info) = tasks.get_mut(id) {
            info.status = status;
        }
    }

    async fn constraints_satisfied(
        monitor: Option<&Arc<dyn NetworkMonitor>>,
        constraints: &TaskConstraints,
    ) -> bool {
        if !(constraints.requires_network || constraints.requires_wifi) {
            return true;
        }

        let Some(monitor) = monitor else {
            warn!("Network constraints requested but no monitor provided; assuming satisfied");
            return true;
        };

        match monitor.get_network_info().await {
            Ok(NetworkInfo {
                status: NetworkStatus::Connected,
                network_type,
                ..
            }) => !constraints.requires_wifi || matches!(network_type, Some(NetworkType::WiFi)),
            Ok(_) => false,
            Err(err) => {
                warn!(error = %err, "Network monitor error");
                false
            }
        }
    }

    async fn invoke(tasks: &TaskTable, id: &TaskId, handler: &TaskHandler) {
        Self::set_status(tasks, id, TaskStatus::Running).await;
        let status = match handler().await {
            Ok(()) => TaskStatus::Completed,
            Err(err) => {
                warn!(task_id = %id.0, error = %err, "Background task failed");
                TaskStatus::Failed
            }
        };
        Self::set_status(tasks, id, status).await;
    }

    async fn run_task(
        tasks: TaskTable,
        id: TaskId,
        handler: TaskHandler,
        schedule: Schedule,
        constraints: TaskConstraints,
        mut cancel_rx: oneshot::Receiver<()>,
        monitor: Option<Arc<dyn NetworkMonitor>>,
    ) {
        match schedule {
            Schedule::Recurring(period) => {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately; recurring work starts one period out.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = &mut cancel_rx => break,
                        _ = ticker.tick() => {
                            if !Self::constraints_satisfied(monitor.as_ref(), &constraints).await {
                                debug!(task_id = %id.0, "Constraints not satisfied; skipping run");
                                continue;
                            }
                            Self::invoke(&tasks, &id, &handler).await;
                        }
                    }
                }
            }
            Schedule::Once(delay) => {
                let mut wait = delay;
                loop {
                    tokio::select! {
                        _ = &mut cancel_rx => return,
                        _ = sleep(wait) => {}
                    }
                    if Self::constraints_satisfied(monitor.as_ref(), &constraints).await {
                        break;
                    }
                    wait = CONSTRAINT_RETRY;
                }
                Self::invoke(&tasks, &id, &handler).await;
            }
        }
    }

    async fn spawn(
        &self,
        task_id: &str,
        schedule: Schedule,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        let handler = self.handler_for(task_id).await?;
        let id = TaskId::new(task_id);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        // Hold the table lock until the entry exists so the task never updates a missing row.
        let mut tasks = self.tasks.write().await;
        let handle = tokio::spawn(Self::run_task(
            Arc::clone(&self.tasks),
            id.clone(),
            handler,
            schedule,
            constraints,
            cancel_rx,
            self.network_monitor.clone(),
        ));

        let previous = tasks.insert(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Scheduled,
                handle: Some(handle),
                cancel: Some(cancel_tx),
            },
        );
        if let Some(previous) = previous {
            debug!(task_id = task_id, "Replacing pending run");
            Self::stop(previous);
        }

        Ok(id)
    }

    fn stop(mut info: TaskInfo) {
        if let Some(cancel) = info.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(handle) = info.handle.take() {
            if !matches!(info.status, TaskStatus::Running) {
                handle.abort();
            }
        }
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> Result<()> {
        self.handlers
            .write()
            .await
            .insert(task_id.to_string(), handler);
        Ok(())
    }

    async fn schedule_task(
        &self,
        task_id: &str,
        interval: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        debug!(
            task_id = task_id,
            interval_secs = interval.as_secs(),
            "Scheduling recurring task"
        );
        self.spawn(task_id, Schedule::Recurring(interval), constraints)
            .await
    }

    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId> {
        debug!(
            task_id = task_id,
            delay_ms = delay.as_millis() as u64,
            "Scheduling one-time task"
        );
        self.spawn(task_id, Schedule::Once(delay), constraints).await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = %task_id.0, "Cancelling task");

        match self.tasks.write().await.remove(task_id) {
            Some(info) => {
                Self::stop(info);
                Ok(())
            }
            None => Err(BridgeError::OperationFailed(format!(
                "Task not found: {}",
                task_id.0
            ))),
        }
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::OperationFailed(format!("Task not found: {}", task_id.0)))
    }
}
