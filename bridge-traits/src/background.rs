//! Background Execution and Task Scheduling
//!
//! Provides platform-aware periodic and one-shot wake-ups.

use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Callback invoked each time a scheduled task fires.
pub type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Task execution constraints
#[derive(Debug, Clone)]
pub struct TaskConstraints {
    /// Require WiFi connection
    pub requires_wifi: bool,
    /// Require any network connection
    pub requires_network: bool,
}

impl Default for TaskConstraints {
    fn default() -> Self {
        Self {
            requires_wifi: false,
            requires_network: true,
        }
    }
}

impl TaskConstraints {
    /// No constraints at all; the task fires on schedule regardless of connectivity.
    pub fn none() -> Self {
        Self {
            requires_wifi: false,
            requires_network: false,
        }
    }
}

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is scheduled but not yet running
    Scheduled,
    /// Task is currently executing
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed
    Failed,
    /// Task was cancelled
    Cancelled,
}

/// Background task executor trait
///
/// Abstracts platform-specific background scheduling:
/// - **iOS**: BGTaskScheduler
/// - **Android**: WorkManager (respects Doze mode)
/// - **Desktop**: Tokio timers
///
/// Handlers are registered by id first; scheduling an id that already has a
/// pending run replaces that run.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{BackgroundExecutor, TaskConstraints};
/// use std::time::Duration;
///
/// async fn schedule_wake(executor: &dyn BackgroundExecutor, handler: TaskHandler) -> Result<()> {
///     executor.register_handler("upload_wake", handler).await?;
///     executor
///         .schedule_task("upload_wake", Duration::from_secs(900), TaskConstraints::default())
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Register the callback to run when `task_id` fires.
    async fn register_handler(&self, task_id: &str, handler: TaskHandler) -> Result<()>;

    /// Schedule a recurring task
    ///
    /// # Platform Notes
    ///
    /// - iOS: Uses BGAppRefreshTask, actual execution timing is system-determined
    /// - Android: Uses WorkManager with specified constraints
    async fn schedule_task(
        &self,
        task_id: &str,
        interval: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId>;

    /// Schedule a one-time delayed task
    async fn schedule_once(
        &self,
        task_id: &str,
        delay: Duration,
        constraints: TaskConstraints,
    ) -> Result<TaskId>;

    /// Cancel a scheduled task
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// Check if background execution is available
    async fn is_available(&self) -> bool {
        true
    }
}
