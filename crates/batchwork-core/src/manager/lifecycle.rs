//! ManagerCore - the lifecycle base both executors embed.
//!
//! Owns:
//! - configuration and the manager's registry name;
//! - the `active` flag and retirement;
//! - the reporter list;
//! - the periodic drain tick;
//! - the wakeups used for backpressure and idle waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::options::{ManagerOptions, Mode};
use super::registry::ManagerRegistry;
use crate::domain::{Failure, ItemId};
use crate::ports::{IdGenerator, ReporterRef};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Critical sections in this crate never leave state half-updated across a
/// panic point, so the inner value stays consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Uniformly random duration in `[0, duration)`.
pub fn jittered(duration: Duration) -> Duration {
    duration.mul_f64(rand::random::<f64>())
}

/// Sleep for `duration`, or for a random part of it when `jitter` is set.
pub async fn await_delay(duration: Duration, jitter: bool) {
    let delay = if jitter { jittered(duration) } else { duration };
    tokio::time::sleep(delay).await;
}

pub(crate) struct ManagerCore {
    name: String,
    options: ManagerOptions,
    active: AtomicBool,
    reporters: Mutex<Vec<ReporterRef>>,
    registry: ManagerRegistry,
    ids: Box<dyn IdGenerator>,
    ticker: Mutex<Option<JoinHandle<()>>>,

    /// Signalled whenever admission capacity or an execution slot frees up.
    space: Notify,

    /// Signalled whenever an item settles or the manager retires.
    settled: Notify,
}

impl ManagerCore {
    pub fn new(
        options: ManagerOptions,
        registry: &ManagerRegistry,
        ids: Box<dyn IdGenerator>,
    ) -> Self {
        let name = registry.register(options.mode);
        info!(manager = %name, mode = %options.mode, "batch manager created");
        Self {
            name,
            options,
            active: AtomicBool::new(true),
            reporters: Mutex::new(Vec::new()),
            registry: registry.clone(),
            ids,
            ticker: Mutex::new(None),
            space: Notify::new(),
            settled: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn next_item_id(&self) -> ItemId {
        self.ids.generate_item_id()
    }

    pub fn register_reporters(&self, reporters: Vec<ReporterRef>) {
        debug!(manager = %self.name, count = reporters.len(), "reporters registered");
        *lock(&self.reporters) = reporters;
    }

    pub fn reporter_count(&self) -> usize {
        lock(&self.reporters).len()
    }

    /// Hand a terminal failure to every reporter.
    ///
    /// Must be called without holding the executor's state lock.
    pub fn report(&self, failure: &Failure) {
        let reporters = lock(&self.reporters).clone();
        tracing::warn!(
            manager = %self.name,
            item = %failure.item,
            attempts = failure.attempts,
            error = %failure.err,
            "retry budget exhausted, reporting failure"
        );
        for reporter in &reporters {
            reporter.report(failure);
        }
    }

    /// Start the periodic drain tick. The tick stops on its own once the
    /// executor state is dropped.
    pub fn start_ticker<S>(&self, target: Weak<S>, step: fn(&std::sync::Arc<S>))
    where
        S: Send + Sync + 'static,
    {
        let period = self.options.drain_interval();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(target) = target.upgrade() else {
                    break;
                };
                step(&target);
            }
        });
        if let Some(old) = lock(&self.ticker).replace(handle) {
            old.abort();
        }
    }

    pub fn ticker_running(&self) -> bool {
        lock(&self.ticker)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// First half of retirement: flip `active`, stop the tick, leave the registry.
    ///
    /// Returns `false` if the manager was already retired.
    pub fn begin_retire(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
        self.registry.deregister(&self.name);
        info!(manager = %self.name, "batch manager retired");
        true
    }

    /// Wake every task blocked on admission or idle waiting.
    pub fn wake_all(&self) {
        self.space.notify_waiters();
        self.settled.notify_waiters();
    }

    pub fn notify_space(&self) {
        self.space.notify_waiters();
    }

    pub fn notify_settled(&self) {
        self.settled.notify_waiters();
    }

    /// Park a blocked submitter until space may have freed up.
    pub async fn wait_for_space(&self) {
        tokio::select! {
            _ = self.space.notified() => {},
            _ = tokio::time::sleep(self.options.admission_poll()) => {},
        }
    }

    /// Park an idle waiter until something settles.
    pub async fn wait_for_settlement(&self) {
        tokio::select! {
            _ = self.settled.notified() => {},
            _ = tokio::time::sleep(self.options.admission_poll()) => {},
        }
    }
}
