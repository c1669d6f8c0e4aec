//! Ready-made reporters.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::Failure;
use crate::manager::lifecycle::lock;
use crate::ports::Reporter;

/// Keeps every failure it sees. Clones share the same storage.
#[derive(Clone, Default)]
pub struct CollectingReporter {
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<Failure> {
        lock(&self.failures).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.failures).len()
    }

    pub fn take(&self) -> Vec<Failure> {
        std::mem::take(&mut *lock(&self.failures))
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, failure: &Failure) {
        lock(&self.failures).push(failure.clone());
    }
}

/// Forwards failures to an unbounded channel, for consumers that want to
/// handle them asynchronously.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<Failure>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Failure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, failure: &Failure) {
        if self.tx.send(failure.clone()).is_err() {
            debug!(item = %failure.item, "failure receiver dropped");
        }
    }
}
