//! Domain model: item ids, tasks and failure descriptors.

pub mod failure;
pub mod ids;
pub mod task;

pub use failure::Failure;
pub use ids::ItemId;
pub use task::{Args, BatchSpec, Task, TaskArgsFn, TaskFn, TaskFuture, TaskKind};

pub(crate) use task::{Attempt, TaskBody};
