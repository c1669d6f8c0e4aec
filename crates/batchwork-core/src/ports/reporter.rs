//! Reporter port - observers of terminal failures.

use std::sync::Arc;

use crate::domain::Failure;

/// Reporter is invoked once per item that exhausted its retry budget.
///
/// Reporters run on the executor's completion path after its internal lock is
/// released, so they may call back into the manager. They should return
/// quickly; hand long work off to a channel or a spawned task.
///
/// Any `Fn(&Failure)` closure is a reporter:
/// ```ignore
/// manager.register_reporters(vec![Arc::new(|failure: &Failure| {
///     eprintln!("gave up on {} after {} attempts", failure.item, failure.attempts);
/// })]);
/// ```
pub trait Reporter: Send + Sync {
    fn report(&self, failure: &Failure);
}

impl<F> Reporter for F
where
    F: Fn(&Failure) + Send + Sync,
{
    fn report(&self, failure: &Failure) {
        self(failure)
    }
}

/// Shared handle stored in a manager's reporter list.
pub type ReporterRef = Arc<dyn Reporter>;
