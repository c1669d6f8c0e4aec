//! Queue item: a resolved task plus its bookkeeping.

use super::state::{ItemStatus, Lane};
use crate::domain::{Attempt, BatchSpec, ItemId, TaskBody};

pub(crate) struct QueueItem<T> {
    pub id: ItemId,
    pub body: TaskBody<T>,

    /// 1-based number of the current (or next) invocation.
    pub attempt: u32,

    pub status: ItemStatus,
    pub lane: Lane,
}

impl<T: Send + 'static> QueueItem<T> {
    pub fn new(id: ItemId, body: TaskBody<T>) -> Self {
        Self {
            id,
            body,
            attempt: 1,
            status: ItemStatus::Pending,
            lane: Lane::Pending,
        }
    }

    /// Mark as running and take this attempt; the callable is not invoked here.
    pub fn start(&mut self) -> Option<Attempt<T>> {
        self.status = ItemStatus::Running;
        self.body.attempt()
    }

    /// Fresh unstarted copy in the errored lane for the next attempt.
    ///
    /// `None` when the work cannot be re-invoked.
    pub fn next_attempt(&self) -> Option<QueueItem<T>> {
        let body = self.body.retry_copy()?;
        Some(Self {
            id: self.id,
            body,
            attempt: self.attempt + 1,
            status: ItemStatus::Pending,
            lane: Lane::Errored,
        })
    }
}

impl<T> QueueItem<T> {
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn spec(&self) -> BatchSpec {
        self.body.spec()
    }
}
