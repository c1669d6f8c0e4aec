//! State enums for the executors.

use serde::{Deserialize, Serialize};

/// Sequential executor state machine.
///
/// State transitions:
/// - Ready -> Waiting -> Ready (success)
/// - Ready -> Waiting -> Error -> Waiting -> ... (in-place retry)
/// - Error -> Ready (retry budget exhausted, item reported)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Nothing executing; the next pending item may start.
    Ready,

    /// The current item's operation is outstanding.
    Waiting,

    /// The current item failed and is waiting for its retry (or its report).
    Error,
}

/// Per-item status.
///
/// `Resolved` and `Errored` are tombstones: the item stays in its lane until
/// the next compaction removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Admitted, not started.
    Pending,

    /// Operation outstanding.
    Running,

    /// Settled successfully.
    Resolved,

    /// Failed attempt. The item either moved on to a retry or was reported.
    Errored,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Resolved | ItemStatus::Errored)
    }
}

/// Lane an item lives in (parallel mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// First attempt.
    Pending,

    /// Any attempt after a failure.
    Errored,
}
