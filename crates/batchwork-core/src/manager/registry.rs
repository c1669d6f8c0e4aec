//! ManagerRegistry - diagnostic bookkeeping of live managers.
//!
//! The registry is an explicit object owned by the caller and handed to the
//! factory, not process-wide state. Managers register on construction and
//! deregister on retirement. Naming is deterministic and injectable.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::lifecycle::lock;
use super::options::Mode;
use crate::ports::{Clock, SystemClock};

/// Builds a manager name from its mode and the per-mode sequence number (1-based).
pub type Namer = Arc<dyn Fn(Mode, u64) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub name: String,
    pub mode: Mode,
    pub registered_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<String, RegistryEntry>,
    counters: HashMap<Mode, u64>,
    registrations: u64,
}

/// Registry of live managers, cheap to clone (shared state).
#[derive(Clone)]
pub struct ManagerRegistry {
    state: Arc<Mutex<RegistryState>>,
    namer: Namer,
    clock: Arc<dyn Clock>,
}

/// `SequentialManager_BatchManager1`, `ParallelManager_BatchManager2`, ...
pub fn default_name(mode: Mode, seq: u64) -> String {
    let prefix = match mode {
        Mode::Sequential => "SequentialManager",
        Mode::Parallel => "ParallelManager",
    };
    format!("{prefix}_BatchManager{seq}")
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            namer: Arc::new(default_name),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_namer<F>(mut self, namer: F) -> Self
    where
        F: Fn(Mode, u64) -> String + Send + Sync + 'static,
    {
        self.namer = Arc::new(namer);
        self
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Register a new manager and return its unique name.
    ///
    /// Sequence numbers only grow, so a retired manager's name is never reused.
    pub(crate) fn register(&self, mode: Mode) -> String {
        let mut state = lock(&self.state);
        state.registrations += 1;
        let seq = {
            let counter = state.counters.entry(mode).or_insert(0);
            *counter += 1;
            *counter
        };

        let mut name = (self.namer)(mode, seq);
        if state.entries.contains_key(&name) {
            // injected namer produced a duplicate
            name = format!("{name}#{}", state.registrations);
        }

        let entry = RegistryEntry {
            name: name.clone(),
            mode,
            registered_at: self.clock.now(),
        };
        state.entries.insert(name.clone(), entry);
        name
    }

    /// Remove a manager. Returns `false` if it was not registered.
    pub(crate) fn deregister(&self, name: &str) -> bool {
        lock(&self.state).entries.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.state).entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        lock(&self.state).entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<RegistryEntry> {
        lock(&self.state).entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }
}

impl Default for ManagerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
