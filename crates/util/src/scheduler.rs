//! Debounced task scheduling.
//!
//! [`RunOnceScheduler`] collapses a burst of `schedule` calls into a single run
//! of its task, fired once the burst has been quiet for the configured delay.
//! Only the waiting phase is cancellable; a run that has started always
//! completes.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

type TaskFactory = dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

/// Runs a task once after a quiet period, restarting the timer on every `schedule`.
pub struct RunOnceScheduler {
    delay: Duration,
    task: Arc<TaskFactory>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RunOnceScheduler {
    pub fn new<F, Fut>(delay: Duration, task: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            task: Arc::new(move || Box::pin(task())),
            pending: Mutex::new(None),
        }
    }

    /// Schedules the task, cancelling a pending run that has not fired yet.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self) {
        let task = Arc::clone(&self.task);
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(task());
        });

        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Returns true while a scheduled run is waiting for its delay to elapse.
    pub fn is_scheduled(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        pending.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Drops any pending run without executing it.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = pending.take() {
            previous.abort();
        }
    }
}

impl Drop for RunOnceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RunOnceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOnceScheduler").field("delay", &self.delay).finish_non_exhaustive()
    }
}
