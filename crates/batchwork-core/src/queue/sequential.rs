//! SequentialExecutor - one item at a time, strict FIFO, in-place retry.
//!
//! State machine:
//! - `Ready`: nothing running; the drain step may start the pending head.
//! - `Waiting`: the current item's future is outstanding.
//! - `Error`: the current item failed; it is either waiting for its retry
//!   timer or about to be reported.
//!
//! # 学習ポイント
//! - 状態は `std::sync::Mutex` に閉じ込め、`.await` をまたいで lock を保持しない
//! - 完了ハンドラ (spawn されたタスク) が lock を取って settle する
//! - reporter 呼び出しは lock を外してから

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::item::QueueItem;
use super::retry::RetryPolicy;
use super::state::{ItemStatus, QueueState};
use crate::domain::{Attempt, Failure, ItemId, Task, TaskBody};
use crate::error::{share, BatchError, TaskResult};
use crate::manager::lifecycle::{lock, ManagerCore};
use crate::manager::{Executor, ManagerOptions, ManagerRegistry, Mode};
use crate::observability::ManagerStatus;
use crate::ports::{IdGenerator, ReporterRef, SystemClock, UlidGenerator};

pub struct SequentialExecutor<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    core: ManagerCore,
    policy: RetryPolicy,
    state: Mutex<SequentialState<T>>,
}

struct SequentialState<T> {
    pending: VecDeque<QueueItem<T>>,

    /// Item being executed (or retried). `Some` in `Waiting` and `Error`.
    current: Option<QueueItem<T>>,

    queue_state: QueueState,
    retry_count: u32,
    results: Vec<T>,
    retry_timer: Option<JoinHandle<()>>,
}

impl<T> SequentialState<T> {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            queue_state: QueueState::Ready,
            retry_count: 0,
            results: Vec::new(),
            retry_timer: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }
}

impl<T: Send + 'static> SequentialExecutor<T> {
    /// Validate `options` (with the mode forced to sequential) and register
    /// the executor in `registry`.
    pub fn new(options: ManagerOptions, registry: &ManagerRegistry) -> Result<Self, BatchError> {
        Self::with_id_generator(options, registry, Box::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(
        options: ManagerOptions,
        registry: &ManagerRegistry,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, BatchError> {
        let options = options.with_mode(Mode::Sequential);
        options.validate()?;
        let policy = options.retry_policy();
        let shared = Arc::new(Shared {
            core: ManagerCore::new(options, registry, ids),
            policy,
            state: Mutex::new(SequentialState::new()),
        });
        shared
            .core
            .start_ticker(Arc::downgrade(&shared), Shared::<T>::drain);
        Ok(Self { shared })
    }
}

impl<T> SequentialExecutor<T> {
    pub fn queue_state(&self) -> QueueState {
        lock(&self.shared.state).queue_state
    }

    /// Retries spent on the current item so far.
    pub fn retry_count(&self) -> u32 {
        lock(&self.shared.state).retry_count
    }

    pub fn current_item(&self) -> Option<ItemId> {
        lock(&self.shared.state).current.as_ref().map(|item| item.id)
    }

    pub fn options(&self) -> &ManagerOptions {
        self.shared.core.options()
    }

    pub fn ticker_running(&self) -> bool {
        self.shared.core.ticker_running()
    }
}

impl<T: Clone> SequentialExecutor<T> {
    /// Copy of the results collected so far, in completion order.
    pub fn results(&self) -> Vec<T> {
        lock(&self.shared.state).results.clone()
    }
}

impl<T: Send + 'static> Shared<T> {
    /// Start the pending head if nothing is running.
    fn drain(self: &Arc<Self>) {
        let (id, attempt) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if !self.core.is_active()
                || state.queue_state != QueueState::Ready
                || state.current.is_some()
            {
                return;
            }
            let Some(mut item) = state.pending.pop_front() else {
                return;
            };
            let attempt = item.start();
            let id = item.id;
            state.queue_state = QueueState::Waiting;
            state.current = Some(item);
            (id, attempt)
        };
        self.core.notify_space();
        debug!(manager = %self.core.name(), item = %id, "item started");
        self.run_attempt(id, attempt);
    }

    /// Drive one attempt to completion on the runtime. Called without the
    /// state lock; a panicking attempt settles as a failure.
    fn run_attempt(self: &Arc<Self>, id: ItemId, attempt: Option<Attempt<T>>) {
        let Some(attempt) = attempt else {
            self.settle(id, Err(BatchError::HandleConsumed(id).into()));
            return;
        };
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = attempt.run().await;
            shared.settle(id, outcome);
        });
    }

    fn settle(self: &Arc<Self>, id: ItemId, outcome: TaskResult<T>) {
        let mut failure = None;
        let mut advance = false;
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if !self.core.is_active() {
                debug!(manager = %self.core.name(), item = %id, "settlement after retirement ignored");
                return;
            }
            let Some(current) = state.current.as_mut().filter(|item| item.id == id) else {
                warn!(manager = %self.core.name(), item = %id, "settlement for an item that is not current");
                return;
            };

            match outcome {
                Ok(value) => {
                    current.status = ItemStatus::Resolved;
                    debug!(manager = %self.core.name(), item = %id, attempt = current.attempt, "item resolved");
                    state.results.push(value);
                    state.current = None;
                    state.retry_count = 0;
                    state.queue_state = QueueState::Ready;
                    advance = true;
                }
                Err(err) => {
                    current.status = ItemStatus::Errored;
                    state.queue_state = QueueState::Error;
                    if state.retry_count < self.policy.max_retries && current.body.is_retryable() {
                        state.retry_count += 1;
                        let delay = self.policy.next_delay(state.retry_count);
                        debug!(
                            manager = %self.core.name(),
                            item = %id,
                            retry = state.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "attempt failed, retrying in place"
                        );
                        let shared = Arc::clone(self);
                        state.retry_timer = Some(tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            shared.retry_current(id);
                        }));
                    } else {
                        failure = Some(Failure {
                            manager: self.core.name().to_string(),
                            item: id,
                            batch: current.spec(),
                            attempts: current.attempt,
                            err: share(err),
                        });
                        state.current = None;
                        state.retry_count = 0;
                        state.queue_state = QueueState::Ready;
                        advance = true;
                    }
                }
            }
        }

        if let Some(failure) = failure {
            self.core.report(&failure);
        }
        self.core.notify_settled();
        if advance {
            self.drain();
        }
    }

    /// Re-invoke the current item after its backoff.
    fn retry_current(self: &Arc<Self>, id: ItemId) {
        let attempt = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            state.retry_timer = None;
            if !self.core.is_active() {
                return;
            }
            let Some(current) = state.current.as_mut().filter(|item| item.id == id) else {
                return;
            };
            current.attempt += 1;
            state.queue_state = QueueState::Waiting;
            current.start()
        };
        trace!(manager = %self.core.name(), item = %id, "retry started");
        self.run_attempt(id, attempt);
    }
}

impl<T> Shared<T> {
    fn retire(&self) {
        if !self.core.begin_retire() {
            return;
        }
        {
            let mut state = lock(&self.state);
            if let Some(timer) = state.retry_timer.take() {
                timer.abort();
            }
            state.pending.clear();
            state.current = None;
            state.results.clear();
            state.retry_count = 0;
            state.queue_state = QueueState::Ready;
        }
        self.core.wake_all();
    }
}

impl<T> Drop for SequentialExecutor<T> {
    fn drop(&mut self) {
        self.shared.retire();
    }
}

#[async_trait]
impl<T: Send + 'static> Executor<T> for SequentialExecutor<T> {
    fn name(&self) -> &str {
        self.shared.core.name()
    }

    fn mode(&self) -> Mode {
        Mode::Sequential
    }

    fn is_active(&self) -> bool {
        self.shared.core.is_active()
    }

    async fn submit(&self, task: Task<T>) -> Result<ItemId, BatchError> {
        let core = &self.shared.core;
        let id = core.next_item_id();
        let item = QueueItem::new(id, TaskBody::from(task));
        let limit = core.options().unresolved_batch_limit;
        loop {
            {
                let mut state = lock(&self.shared.state);
                if !core.is_active() {
                    return Err(BatchError::Retired(core.name().to_string()));
                }
                if state.pending.len() < limit {
                    state.pending.push_back(item);
                    break;
                }
            }
            trace!(manager = %core.name(), limit, "admission blocked");
            core.wait_for_space().await;
        }
        debug!(manager = %core.name(), item = %id, "item admitted");
        self.shared.drain();
        Ok(id)
    }

    fn register_reporters(&self, reporters: Vec<ReporterRef>) {
        self.shared.core.register_reporters(reporters);
    }

    fn retire(&self) {
        self.shared.retire();
    }

    fn pending_len(&self) -> usize {
        lock(&self.shared.state).pending.len()
    }

    fn errored_len(&self) -> usize {
        0
    }

    fn results_len(&self) -> usize {
        lock(&self.shared.state).results.len()
    }

    fn take_results(&self) -> Vec<T> {
        std::mem::take(&mut lock(&self.shared.state).results)
    }

    fn status(&self) -> ManagerStatus {
        let state = lock(&self.shared.state);
        let running = state
            .current
            .as_ref()
            .is_some_and(|item| item.status == ItemStatus::Running);
        ManagerStatus {
            name: self.shared.core.name().to_string(),
            mode: Mode::Sequential,
            active: self.shared.core.is_active(),
            pending: state.pending.len(),
            errored: 0,
            in_flight: usize::from(running),
            results: state.results.len(),
            queue_state: Some(state.queue_state),
            retry_count: Some(state.retry_count),
        }
    }

    async fn wait_idle(&self) {
        loop {
            if !self.shared.core.is_active() || lock(&self.shared.state).is_idle() {
                return;
            }
            self.shared.core.wait_for_settlement().await;
        }
    }
}
