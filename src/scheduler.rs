//! Timer capability used by guards.
//!
//! Guards never touch a global timer directly. They go through a
//! [`Scheduler`] so tests can swap in a clock they control.

use std::{fmt, time::Duration};

/// A one-shot callback run by a [`Scheduler`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Schedules one-shot tasks after a delay.
pub trait Scheduler: fmt::Debug + Send + Sync + 'static {
    /// Run `task` once `delay` has elapsed, unless the returned handle is
    /// cancelled first.
    ///
    /// The task must not run before this method returns. Guards call this
    /// without holding their internal lock.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task; call [`TaskHandle::cancel`].
pub struct TaskHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TaskHandle {
    /// Create a new `TaskHandle` that runs `cancel` when cancelled.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the task.
    ///
    /// A task that already started running may still complete. Guards never
    /// hold their internal lock while calling this, so a cancel that waits
    /// for a running task to return is fine.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish()
    }
}

/// [`Scheduler`] backed by the tokio runtime.
///
/// Each task is spawned onto the current runtime and sleeps with
/// [`tokio::time::sleep`], so it honours paused time in tests. Must be used
/// from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler {
    _priv: (),
}

impl TokioScheduler {
    /// Create a new `TokioScheduler`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        TaskHandle::new(move || join.abort())
    }
}
