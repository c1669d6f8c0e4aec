//! Queue module: the two executors and the state they share.
//!
//! - [`SequentialExecutor`]: one item in flight, in-place retry, strict FIFO.
//! - [`ParallelExecutor`]: bounded pool, per-item retry through an errored lane.

mod item;
mod parallel;
mod retry;
mod sequential;
mod state;

pub use parallel::ParallelExecutor;
pub use retry::RetryPolicy;
pub use sequential::SequentialExecutor;
pub use state::{ItemStatus, Lane, QueueState};
