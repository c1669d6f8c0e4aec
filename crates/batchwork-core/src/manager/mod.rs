//! Manager module: configuration, lifecycle and the mode-independent handle.
//!
//! - options: `ManagerOptions` / `Mode`
//! - registry: diagnostic naming of live managers
//! - lifecycle: `ManagerCore`, shared by both executors
//! - executor: the `Executor` trait
//! - builder: `ManagerBuilder`

mod builder;
mod executor;
pub(crate) mod lifecycle;
mod options;
mod registry;

use async_trait::async_trait;

pub use builder::ManagerBuilder;
pub use executor::Executor;
pub use lifecycle::{await_delay, jittered};
pub use options::{ManagerOptions, Mode};
pub use registry::{default_name, ManagerRegistry, Namer, RegistryEntry};

use crate::domain::{ItemId, Task};
use crate::error::BatchError;
use crate::observability::ManagerStatus;
use crate::ports::{IdGenerator, ReporterRef, SystemClock, UlidGenerator};
use crate::queue::{ParallelExecutor, SequentialExecutor};

/// A batch manager of either mode.
///
/// Dropping the handle retires the manager.
pub enum BatchManager<T> {
    Sequential(SequentialExecutor<T>),
    Parallel(ParallelExecutor<T>),
}

/// Validate `options` and create a manager of the configured mode.
///
/// ```ignore
/// let registry = ManagerRegistry::new();
/// let manager = batch_manager::<u32>(ManagerOptions::default(), &registry)?;
/// manager.submit(Task::call(|| async { Ok(1) })).await?;
/// ```
pub fn batch_manager<T: Send + 'static>(
    options: ManagerOptions,
    registry: &ManagerRegistry,
) -> Result<BatchManager<T>, BatchError> {
    BatchManager::with_id_generator(options, registry, Box::new(UlidGenerator::new(SystemClock)))
}

impl<T: Send + 'static> BatchManager<T> {
    pub(crate) fn with_id_generator(
        options: ManagerOptions,
        registry: &ManagerRegistry,
        ids: Box<dyn IdGenerator>,
    ) -> Result<Self, BatchError> {
        Ok(match options.mode {
            Mode::Sequential => {
                BatchManager::Sequential(SequentialExecutor::with_id_generator(options, registry, ids)?)
            }
            Mode::Parallel => {
                BatchManager::Parallel(ParallelExecutor::with_id_generator(options, registry, ids)?)
            }
        })
    }
}

impl<T> BatchManager<T> {
    pub fn as_sequential(&self) -> Option<&SequentialExecutor<T>> {
        match self {
            BatchManager::Sequential(executor) => Some(executor),
            BatchManager::Parallel(_) => None,
        }
    }

    pub fn as_parallel(&self) -> Option<&ParallelExecutor<T>> {
        match self {
            BatchManager::Parallel(executor) => Some(executor),
            BatchManager::Sequential(_) => None,
        }
    }

    pub fn options(&self) -> &ManagerOptions {
        match self {
            BatchManager::Sequential(executor) => executor.options(),
            BatchManager::Parallel(executor) => executor.options(),
        }
    }
}

impl<T: Send + 'static> BatchManager<T> {
    fn inner(&self) -> &dyn Executor<T> {
        match self {
            BatchManager::Sequential(executor) => executor,
            BatchManager::Parallel(executor) => executor,
        }
    }
}

impl<T: Clone + Send + 'static> BatchManager<T> {
    pub fn results(&self) -> Vec<T> {
        match self {
            BatchManager::Sequential(executor) => executor.results(),
            BatchManager::Parallel(executor) => executor.results(),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Executor<T> for BatchManager<T> {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn mode(&self) -> Mode {
        self.inner().mode()
    }

    fn is_active(&self) -> bool {
        self.inner().is_active()
    }

    async fn submit(&self, task: Task<T>) -> Result<ItemId, BatchError> {
        self.inner().submit(task).await
    }

    fn register_reporters(&self, reporters: Vec<ReporterRef>) {
        self.inner().register_reporters(reporters)
    }

    fn retire(&self) {
        self.inner().retire()
    }

    fn pending_len(&self) -> usize {
        self.inner().pending_len()
    }

    fn errored_len(&self) -> usize {
        self.inner().errored_len()
    }

    fn results_len(&self) -> usize {
        self.inner().results_len()
    }

    fn take_results(&self) -> Vec<T> {
        self.inner().take_results()
    }

    fn status(&self) -> ManagerStatus {
        self.inner().status()
    }

    async fn wait_idle(&self) {
        self.inner().wait_idle().await
    }
}
