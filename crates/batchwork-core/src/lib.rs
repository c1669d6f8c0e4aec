//! batchwork-core
//!
//! In-process batch managers: a bounded admission queue in front of either a
//! sequential or a bounded-parallel executor, with automatic retries and
//! failure reporting.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ItemId, Task, Failure）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, Reporter, RecordSink）
//! - **manager**: options, registry, lifecycle, `Executor` trait, factory / builder
//! - **queue**: SequentialExecutor / ParallelExecutor と retry policy
//! - **impls**: 実装（RecordBuffer, CollectingReporter, ChannelReporter）
//! - **observability**: status views
//! - **error**: エラー型
//!
//! ```ignore
//! let registry = ManagerRegistry::new();
//! let manager = ManagerBuilder::new()
//!     .mode(Mode::Parallel)
//!     .registry(&registry)
//!     .build::<u32>()?;
//! manager.submit(Task::call(|| async { Ok(1) })).await?;
//! manager.wait_idle().await;
//! ```

pub mod domain;
pub mod error;
pub mod impls;
pub mod manager;
pub mod observability;
pub mod ports;
pub mod queue;

pub use domain::{Args, BatchSpec, Failure, ItemId, Task, TaskKind};
pub use error::{BatchError, SharedError, TaskError, TaskResult};
pub use manager::{
    batch_manager, BatchManager, Executor, ManagerBuilder, ManagerOptions, ManagerRegistry, Mode,
};
pub use observability::ManagerStatus;
pub use ports::{RecordSink, Reporter, ReporterRef};
pub use queue::{ItemStatus, ParallelExecutor, QueueState, RetryPolicy, SequentialExecutor};
