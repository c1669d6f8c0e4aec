//! ParallelExecutor - bounded pool with per-item retries.
//!
//! Items live in one of two lanes:
//! - pending: first attempts, started FIFO while a slot is free;
//! - errored: later attempts, re-admitted after a backoff timer.
//!
//! Settled items stay in their lane as tombstones (`Resolved` / `Errored`)
//! until the next drain compacts the lanes.
//!
//! Slot accounting:
//! - a pending-lane item takes a slot when it starts;
//! - a failed item that will be retried keeps its slot through the backoff
//!   and the retried attempt;
//! - the slot is released when the item resolves or is reported.
//!
//! # 学習ポイント
//! - retry timer は item id をキーに `HashMap<ItemId, JoinHandle>` で保持し、retire で abort
//! - 完了ハンドラは lane と id で item を探す (同じ id の tombstone は status で区別)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::item::QueueItem;
use super::retry::RetryPolicy;
use super::state::{ItemStatus, Lane};
use crate::domain::{Attempt, Failure, ItemId, Task, TaskBody};
use crate::error::{share, BatchError, TaskResult};
use crate::manager::lifecycle::{lock, ManagerCore};
use crate::manager::{Executor, ManagerOptions, ManagerRegistry, Mode};
use crate::observability::ManagerStatus;
use crate::ports::{IdGenerator, ReporterRef, SystemClock, UlidGenerator};

pub struct ParallelExecutor<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    core: ManagerCore,
    policy: RetryPolicy,
    state: Mutex<ParallelState<T>>,
}

struct ParallelState<T> {
    pending: Vec<QueueItem<T>>,
    errored: Vec<QueueItem<T>>,

    /// Slots currently taken.
    in_flight: usize,

    results: Vec<T>,

    /// Items waiting out their backoff, keyed by id.
    retry_timers: HashMap<ItemId, JoinHandle<()>>,
}

fn live<T>(lane: &[QueueItem<T>]) -> usize {
    lane.iter().filter(|item| item.is_live()).count()
}

impl<T> ParallelState<T> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            errored: Vec::new(),
            in_flight: 0,
            results: Vec::new(),
            retry_timers: HashMap::new(),
        }
    }

    fn pending_len(&self) -> usize {
        live(&self.pending)
    }

    fn errored_len(&self) -> usize {
        live(&self.errored) + self.retry_timers.len()
    }

    /// Items counted against the unresolved limit.
    fn unresolved(&self) -> usize {
        self.pending_len() + self.errored_len()
    }

    fn is_idle(&self) -> bool {
        self.unresolved() == 0 && self.in_flight == 0
    }

    fn compact(&mut self) {
        self.pending.retain(QueueItem::is_live);
        self.errored.retain(QueueItem::is_live);
    }
}

impl<T: Send + 'static> ParallelExecutor<T> {
    /// Validate `options` (with the mode forced to parallel) and register
    /// the executor in `registry`.
    pub fn new(options: ManagerOptions, registry: &ManagerRegistry) -> Result<Self, BatchError> {
        Self::with_id_generator(options, registry, Box::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_id_generator(
        options: ManagerOptions,
        registry: &ManagerRegistry,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, BatchError> {
        let options = options.with_mode(Mode::Parallel);
        options.validate()?;
        let policy = options.retry_policy();
        let shared = Arc::new(Shared {
            core: ManagerCore::new(options, registry, ids),
            policy,
            state: Mutex::new(ParallelState::new()),
        });
        shared
            .core
            .start_ticker(Arc::downgrade(&shared), Shared::<T>::drain);
        Ok(Self { shared })
    }
}

impl<T> ParallelExecutor<T> {
    pub fn current_in_flight(&self) -> usize {
        lock(&self.shared.state).in_flight
    }

    pub fn in_flight_limit(&self) -> usize {
        self.shared.core.options().max_in_flight
    }

    pub fn options(&self) -> &ManagerOptions {
        self.shared.core.options()
    }

    pub fn ticker_running(&self) -> bool {
        self.shared.core.ticker_running()
    }
}

impl<T: Clone> ParallelExecutor<T> {
    /// Copy of the results collected so far, in completion order.
    pub fn results(&self) -> Vec<T> {
        lock(&self.shared.state).results.clone()
    }
}

impl<T: Send + 'static> Shared<T> {
    /// Compact both lanes, then start whatever may start.
    fn drain(self: &Arc<Self>) {
        let started = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if !self.core.is_active() {
                return;
            }
            state.compact();

            let mut started = Vec::new();
            for item in state
                .errored
                .iter_mut()
                .filter(|item| item.status == ItemStatus::Pending)
            {
                started.push((item.id, item.lane, item.start()));
            }

            let limit = self.core.options().max_in_flight;
            for item in state
                .pending
                .iter_mut()
                .filter(|item| item.status == ItemStatus::Pending)
            {
                if state.in_flight >= limit {
                    break;
                }
                state.in_flight += 1;
                started.push((item.id, item.lane, item.start()));
            }
            started
        };

        for (id, lane, attempt) in started {
            trace!(manager = %self.core.name(), item = %id, ?lane, "item started");
            self.run_attempt(id, lane, attempt);
        }
    }

    /// Called without the state lock; a panicking attempt settles as a failure.
    fn run_attempt(self: &Arc<Self>, id: ItemId, lane: Lane, attempt: Option<Attempt<T>>) {
        let Some(attempt) = attempt else {
            self.settle(id, lane, Err(BatchError::HandleConsumed(id).into()));
            return;
        };
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = attempt.run().await;
            shared.settle(id, lane, outcome);
        });
    }

    fn settle(self: &Arc<Self>, id: ItemId, lane: Lane, outcome: TaskResult<T>) {
        let mut failure = None;
        let released;
        {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            if !self.core.is_active() {
                debug!(manager = %self.core.name(), item = %id, "settlement after retirement ignored");
                return;
            }
            let items = match lane {
                Lane::Pending => &mut state.pending,
                Lane::Errored => &mut state.errored,
            };
            let Some(item) = items
                .iter_mut()
                .find(|item| item.id == id && item.status == ItemStatus::Running)
            else {
                warn!(manager = %self.core.name(), item = %id, ?lane, "settlement for an unknown item");
                return;
            };

            match outcome {
                Ok(value) => {
                    item.status = ItemStatus::Resolved;
                    debug!(manager = %self.core.name(), item = %id, attempt = item.attempt, "item resolved");
                    state.results.push(value);
                    state.in_flight = state.in_flight.saturating_sub(1);
                    released = true;
                }
                Err(err) => {
                    item.status = ItemStatus::Errored;
                    let next = if item.attempt < self.policy.max_retries {
                        item.next_attempt()
                    } else {
                        None
                    };
                    match next {
                        Some(next) => {
                            let delay = self.policy.next_delay(item.attempt);
                            debug!(
                                manager = %self.core.name(),
                                item = %id,
                                attempt = item.attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "attempt failed, scheduling retry"
                            );
                            let shared = Arc::clone(self);
                            let timer = tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                shared.readmit(next);
                            });
                            state.retry_timers.insert(id, timer);
                            released = false;
                        }
                        None => {
                            failure = Some(Failure {
                                manager: self.core.name().to_string(),
                                item: id,
                                batch: item.spec(),
                                attempts: item.attempt,
                                err: share(err),
                            });
                            state.in_flight = state.in_flight.saturating_sub(1);
                            released = true;
                        }
                    }
                }
            }
        }

        if let Some(failure) = failure {
            self.core.report(&failure);
        }
        if released {
            self.core.notify_space();
        }
        self.core.notify_settled();
        if released {
            self.drain();
        }
    }

    /// Put a retried item back into the errored lane once its backoff elapsed.
    fn readmit(self: &Arc<Self>, item: QueueItem<T>) {
        {
            let mut state = lock(&self.state);
            state.retry_timers.remove(&item.id);
            if !self.core.is_active() {
                return;
            }
            trace!(manager = %self.core.name(), item = %item.id, attempt = item.attempt, "item re-admitted");
            state.errored.push(item);
        }
        self.drain();
    }
}

impl<T> Shared<T> {
    fn retire(&self) {
        if !self.core.begin_retire() {
            return;
        }
        {
            let mut state = lock(&self.state);
            for (_, timer) in state.retry_timers.drain() {
                timer.abort();
            }
            state.pending.clear();
            state.errored.clear();
            state.results.clear();
            state.in_flight = 0;
        }
        self.core.wake_all();
    }
}

impl<T> Drop for ParallelExecutor<T> {
    fn drop(&mut self) {
        self.shared.retire();
    }
}

#[async_trait]
impl<T: Send + 'static> Executor<T> for ParallelExecutor<T> {
    fn name(&self) -> &str {
        self.shared.core.name()
    }

    fn mode(&self) -> Mode {
        Mode::Parallel
    }

    fn is_active(&self) -> bool {
        self.shared.core.is_active()
    }

    async fn submit(&self, task: Task<T>) -> Result<ItemId, BatchError> {
        let core = &self.shared.core;
        let id = core.next_item_id();
        let body = TaskBody::from(task);
        // a started operation needs a slot right away
        let already_started = !body.is_retryable();
        let mut item = QueueItem::new(id, body);
        let limit = core.options().unresolved_batch_limit;
        let slots = core.options().max_in_flight;

        let started = loop {
            {
                let mut guard = lock(&self.shared.state);
                let state = &mut *guard;
                if !core.is_active() {
                    return Err(BatchError::Retired(core.name().to_string()));
                }
                let has_slot = !already_started || state.in_flight < slots;
                if state.unresolved() < limit && has_slot {
                    let attempt = if already_started {
                        state.in_flight += 1;
                        Some(item.start())
                    } else {
                        None
                    };
                    state.pending.push(item);
                    break attempt;
                }
            }
            trace!(manager = %core.name(), limit, "admission blocked");
            core.wait_for_space().await;
        };

        debug!(manager = %core.name(), item = %id, "item admitted");
        if let Some(attempt) = started {
            self.shared.run_attempt(id, Lane::Pending, attempt);
        }
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
        lock(&self.shared.state).pending_len()
    }

    fn errored_len(&self) -> usize {
        lock(&self.shared.state).errored_len()
    }

    fn results_len(&self) -> usize {
        lock(&self.shared.state).results.len()
    }

    fn take_results(&self) -> Vec<T> {
        std::mem::take(&mut lock(&self.shared.state).results)
    }

    fn status(&self) -> ManagerStatus {
        let state = lock(&self.shared.state);
        ManagerStatus {
            name: self.shared.core.name().to_string(),
            mode: Mode::Parallel,
            active: self.shared.core.is_active(),
            pending: state.pending_len(),
            errored: state.errored_len(),
            in_flight: state.in_flight,
            results: state.results.len(),
            queue_state: None,
            retry_count: None,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::impls::CollectingReporter;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::sleep;

    fn options() -> ManagerOptions {
        ManagerOptions::default()
            .with_mode(Mode::Parallel)
            .with_retry_backoff(Duration::from_millis(100), false)
    }

    fn manager(options: ManagerOptions) -> (Arc<ParallelExecutor<u32>>, ManagerRegistry) {
        let registry = ManagerRegistry::new();
        let manager = Arc::new(ParallelExecutor::new(options, &registry).unwrap());
        (manager, registry)
    }

    /// Task that fails on its first `failures` invocations.
    fn flaky(calls: &Arc<AtomicU32>, failures: u32, value: u32) -> Task<u32> {
        let calls = Arc::clone(calls);
        Task::call(move || {
            let calls = Arc::clone(&calls);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    Err::<u32, TaskError>("flaky".into())
                } else {
                    Ok(value)
                }
            }
        })
    }

    fn gated(rx: &watch::Receiver<bool>, value: u32) -> Task<u32> {
        let mut rx = rx.clone();
        Task::spawn(async move {
            rx.wait_for(|open| *open).await?;
            Ok::<_, TaskError>(value)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_max_in_flight() {
        let (manager, _registry) = manager(options().with_max_in_flight(50));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for value in 0..100u32 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            manager
                .submit(Task::call(move || {
                    let running = Arc::clone(&running);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, TaskError>(value)
                    }
                }))
                .await
                .unwrap();
        }
        assert_eq!(manager.current_in_flight(), 50);

        manager.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 50);
        assert_eq!(manager.current_in_flight(), 0);

        let mut results = manager.results();
        results.sort_unstable();
        assert_eq!(results, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_budget_reports_once() {
        let (manager, _registry) = manager(options().with_max_retries(1));
        let reporter = CollectingReporter::new();
        manager.register_reporters(vec![Arc::new(reporter.clone())]);

        let calls = Arc::new(AtomicU32::new(0));
        manager.submit(flaky(&calls, u32::MAX, 0)).await.unwrap();
        manager.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.count(), 1);
        assert_eq!(reporter.failures()[0].attempts, 1);
        assert_eq!(manager.current_in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_item_reports_attempt_count() {
        let (manager, _registry) = manager(options().with_max_retries(3));
        let reporter = CollectingReporter::new();
        manager.register_reporters(vec![Arc::new(reporter.clone())]);

        let calls = Arc::new(AtomicU32::new(0));
        let id = manager.submit(flaky(&calls, u32::MAX, 0)).await.unwrap();
        manager.wait_idle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let failures = reporter.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 3);
        assert_eq!(failures[0].item, id);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_keeps_slot_and_moves_to_errored_lane() {
        let (manager, _registry) = manager(options().with_max_retries(5));
        let reporter = CollectingReporter::new();
        manager.register_reporters(vec![Arc::new(reporter.clone())]);

        let calls = Arc::new(AtomicU32::new(0));
        manager.submit(flaky(&calls, 2, 7)).await.unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.errored_len(), 1);
        assert_eq!(manager.pending_len(), 0);
        assert_eq!(manager.current_in_flight(), 1);

        manager.wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.results(), vec![7]);
        assert_eq!(manager.errored_len(), 0);
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn started_operation_takes_a_slot_at_admission() {
        let (manager, _registry) = manager(options().with_max_in_flight(1));
        let (gate, rx) = watch::channel(false);

        manager.submit(gated(&rx, 1)).await.unwrap();
        assert_eq!(manager.current_in_flight(), 1);

        let blocked = tokio::spawn({
            let manager = Arc::clone(&manager);
            let task = gated(&rx, 2);
            async move { manager.submit(task).await }
        });
        sleep(Duration::from_millis(500)).await;
        assert!(!blocked.is_finished());

        gate.send(true).unwrap();
        blocked.await.unwrap().unwrap();
        manager.wait_idle().await;

        let mut results = manager.results();
        results.sort_unstable();
        assert_eq!(results, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_blocks_while_unresolved_limit_is_reached() {
        let (manager, _registry) = manager(
            options()
                .with_max_in_flight(1)
                .with_unresolved_batch_limit(2),
        );
        let (gate, rx) = watch::channel(false);
        let callable = |value: u32| {
            let rx = rx.clone();
            Task::call(move || {
                let mut rx = rx.clone();
                async move {
                    rx.wait_for(|open| *open).await?;
                    Ok::<_, TaskError>(value)
                }
            })
        };

        manager.submit(callable(1)).await.unwrap();
        manager.submit(callable(2)).await.unwrap();
        assert_eq!(manager.pending_len(), 2);
        assert_eq!(manager.current_in_flight(), 1);

        let blocked = tokio::spawn({
            let manager = Arc::clone(&manager);
            let task = callable(3);
            async move { manager.submit(task).await }
        });
        sleep(Duration::from_millis(500)).await;
        assert!(!blocked.is_finished());

        gate.send(true).unwrap();
        blocked.await.unwrap().unwrap();
        manager.wait_idle().await;
        assert_eq!(manager.results_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retire_cancels_retry_timers_and_ignores_late_settlements() {
        let (manager, registry) = manager(
            options()
                .with_max_retries(5)
                .with_retry_backoff(Duration::from_millis(1000), false),
        );
        let reporter = CollectingReporter::new();
        manager.register_reporters(vec![Arc::new(reporter.clone())]);

        let calls = Arc::new(AtomicU32::new(0));
        manager.submit(flaky(&calls, u32::MAX, 0)).await.unwrap();
        manager
            .submit(Task::call(|| async {
                sleep(Duration::from_millis(300)).await;
                Ok::<_, TaskError>(1)
            }))
            .await
            .unwrap();

        sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.errored_len(), 1);

        manager.retire();
        manager.retire();
        assert!(registry.is_empty());
        assert!(!manager.ticker_running());
        assert_eq!(manager.errored_len(), 0);
        assert_eq!(manager.pending_len(), 0);
        assert_eq!(manager.current_in_flight(), 0);

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.results().is_empty());
        assert_eq!(reporter.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_retire_is_rejected() {
        let (manager, _registry) = manager(options());
        manager.retire();
        let calls = Arc::new(AtomicU32::new(0));
        let err = manager.submit(flaky(&calls, 0, 1)).await.unwrap_err();
        assert!(matches!(err, BatchError::Retired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn status_counts_lanes_and_slots() {
        let (manager, _registry) = manager(options().with_max_in_flight(1));
        let (_gate, rx) = watch::channel(false);
        manager.submit(gated(&rx, 1)).await.unwrap();

        let status = manager.status();
        assert_eq!(status.mode, Mode::Parallel);
        assert_eq!(status.pending, 1);
        assert_eq!(status.in_flight, 1);
        assert_eq!(status.queue_state, None);
        assert!(status.active);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_releases_its_slot_after_its_retries() {
        let (manager, _registry) = manager(options().with_max_in_flight(1).with_max_retries(3));
        let reporter = CollectingReporter::new();
        manager.register_reporters(vec![Arc::new(reporter.clone())]);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        manager
            .submit(Task::call(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < u32::MAX {
                        panic!("task body exploded");
                    }
                    Ok::<u32, TaskError>(0)
                }
            }))
            .await
            .unwrap();
        manager
            .submit(Task::call(|| async { Ok::<_, TaskError>(7) }))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(60), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.results(), vec![7]);
        assert_eq!(manager.current_in_flight(), 0);
        let failures = reporter.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 3);
        assert!(failures[0].err.to_string().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn callable_can_inspect_its_manager_while_starting() {
        let (manager, _registry) = manager(options().with_max_in_flight(2));
        let handle = Arc::new(std::sync::OnceLock::<std::sync::Weak<ParallelExecutor<u32>>>::new());
        handle.set(Arc::downgrade(&manager)).unwrap();

        for _ in 0..2 {
            let seen = Arc::clone(&handle);
            manager
                .submit(Task::call(move || {
                    let pending = seen
                        .get()
                        .and_then(std::sync::Weak::upgrade)
                        .map(|manager| manager.pending_len() as u32);
                    async move { Ok::<_, TaskError>(pending.unwrap_or(u32::MAX)) }
                }))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(60), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(manager.results_len(), 2);
        assert!(manager.results().iter().all(|&pending| pending <= 2));
    }

    #[tokio::test(start_paused = true)]
    async fn constructor_rejects_a_zero_slot_pool() {
        let registry = ManagerRegistry::new();
        // the mode is forced to parallel, so maxInFlight is checked
        let options = ManagerOptions::default().with_max_in_flight(0);
        let err = ParallelExecutor::<u32>::new(options, &registry).err().unwrap();
        assert!(matches!(err, BatchError::InvalidOptions { field: "maxInFlight", .. }));
        assert!(registry.is_empty());
    }
}
