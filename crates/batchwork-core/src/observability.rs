use serde::{Deserialize, Serialize};

use crate::manager::Mode;
use crate::queue::QueueState;

/// Point-in-time view of a manager, for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub name: String,
    pub mode: Mode,
    pub active: bool,
    pub pending: usize,
    pub errored: usize,
    pub in_flight: usize,
    pub results: usize,

    /// Sequential mode only.
    pub queue_state: Option<QueueState>,

    /// Sequential mode only.
    pub retry_count: Option<u32>,
}
