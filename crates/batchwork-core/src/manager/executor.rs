//! Executor - the mode-independent surface of a batch manager.

use std::time::Duration;

use async_trait::async_trait;

use super::options::Mode;
use crate::domain::{ItemId, Task};
use crate::error::BatchError;
use crate::observability::ManagerStatus;
use crate::ports::ReporterRef;

/// Operations shared by the sequential and parallel executors.
///
/// Task failures never surface through these methods; they are retried and
/// eventually handed to the registered reporters.
#[async_trait]
pub trait Executor<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> Mode;

    fn is_active(&self) -> bool;

    /// Admit one task, waiting while the unresolved limit is reached.
    ///
    /// Fails only if the manager is (or becomes) retired before admission.
    async fn submit(&self, task: Task<T>) -> Result<ItemId, BatchError>;

    async fn submit_one(&self, task: Task<T>) -> Result<ItemId, BatchError> {
        self.submit(task).await
    }

    /// Admit tasks in order; each one goes through backpressure on its own.
    async fn submit_many(&self, tasks: Vec<Task<T>>) -> Result<Vec<ItemId>, BatchError> {
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.submit(task).await?);
        }
        Ok(ids)
    }

    /// Replace the reporter list.
    fn register_reporters(&self, reporters: Vec<ReporterRef>);

    async fn await_delay(&self, duration: Duration, jitter: bool) {
        super::lifecycle::await_delay(duration, jitter).await
    }

    /// Stop the manager. Idempotent; outcomes of work still in flight are dropped.
    fn retire(&self);

    /// Sequential: items queued behind the current one. Parallel: live
    /// first-attempt items, running or not.
    fn pending_len(&self) -> usize;

    /// Items in their retry cycle, including those waiting out a backoff
    /// (parallel mode; always 0 in sequential mode).
    fn errored_len(&self) -> usize;

    fn results_len(&self) -> usize;

    /// Move the accumulated results out of the manager.
    fn take_results(&self) -> Vec<T>;

    fn status(&self) -> ManagerStatus;

    /// Resolve once no work is pending, running or waiting to be retried,
    /// or once the manager is retired.
    async fn wait_idle(&self);
}
