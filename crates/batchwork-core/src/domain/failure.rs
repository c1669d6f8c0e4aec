//! Failure descriptor handed to reporters once a task exhausts its retry budget.

use std::fmt;

use serde::Serialize;

use super::ids::ItemId;
use super::task::BatchSpec;
use crate::error::SharedError;

/// Terminal failure of one queued item.
///
/// Every registered reporter receives the same descriptor exactly once.
#[derive(Clone, Serialize)]
pub struct Failure {
    /// Name of the manager that gave up on the item.
    pub manager: String,

    pub item: ItemId,

    /// The submitted work, including its bound argument list if it had one.
    pub batch: BatchSpec,

    /// Number of invocations made before giving up.
    pub attempts: u32,

    /// Error of the last attempt.
    #[serde(serialize_with = "serialize_error")]
    pub err: SharedError,
}

impl Failure {
    /// Original argument list of a `Task::CallWith`.
    pub fn args(&self) -> Option<&[serde_json::Value]> {
        self.batch.args.as_deref()
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("manager", &self.manager)
            .field("item", &self.item)
            .field("batch", &self.batch)
            .field("attempts", &self.attempts)
            .field("err", &self.err.to_string())
            .finish()
    }
}

fn serialize_error<S: serde::Serializer>(err: &SharedError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}
