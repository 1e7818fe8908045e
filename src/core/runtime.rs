//! Scheduler and timer seam
//!
//! Strategies never call `tokio::spawn` directly; they go through a
//! [`Scheduler`] so the runtime that drives operations is swappable.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

use crate::core::errors::{Result, TetherError};

/// Handle to a spawned or scheduled task
pub struct TaskHandle {
    abort: AbortHandle,
}

impl TaskHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Cancel the task. A task that has not started yet never runs.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Executes continuations and delayed callbacks
pub trait Scheduler: Send + Sync {
    /// Run `task` to completion in the background
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<TaskHandle>;

    /// Run `task` once `delay` has elapsed, measured from this call
    fn spawn_after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Result<TaskHandle>;
}

/// Scheduler backed by a tokio runtime.
///
/// Without an explicit handle it uses whichever runtime the caller is on.
#[derive(Clone, Debug, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn handle(&self) -> Result<Handle> {
        match &self.handle {
            Some(handle) => Ok(handle.clone()),
            None => Handle::try_current().map_err(|e| TetherError::runtime(e.to_string())),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> Result<TaskHandle> {
        let handle = self.handle()?;
        Ok(TaskHandle::new(handle.spawn(task).abort_handle()))
    }

    fn spawn_after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Result<TaskHandle> {
        let handle = self.handle()?;
        // The deadline is fixed now, not when the task is first polled.
        let deadline = tokio::time::Instant::now() + delay;
        let join = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            task.await;
        });
        Ok(TaskHandle::new(join.abort_handle()))
    }
}
