//! Task: the unit of work accepted by the executors.
//!
//! A task is one of three shapes:
//! - a bare async callable (`Task::call`);
//! - a callable plus an ordered argument list applied at invocation time
//!   (`Task::call_with`);
//! - an operation the caller already started (`Task::started` / `Task::spawn`).
//!
//! The shape is resolved once at admission into a [`TaskBody`], so the
//! executors never re-inspect the public variant.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::error::{TaskError, TaskResult};

/// Boxed future produced by one invocation of a task.
pub type TaskFuture<T> = Pin<Box<dyn Future<Output = TaskResult<T>> + Send + 'static>>;

/// Ordered argument list bound to a [`Task::CallWith`].
pub type Args = Vec<serde_json::Value>;

/// Callable that produces a fresh future on every invocation.
pub type TaskFn<T> = Arc<dyn Fn() -> TaskFuture<T> + Send + Sync>;

/// Callable that receives the bound argument list on every invocation.
pub type TaskArgsFn<T> = Arc<dyn Fn(Args) -> TaskFuture<T> + Send + Sync>;

pub enum Task<T> {
    /// Async callable without arguments.
    Call(TaskFn<T>),

    /// Async callable with an argument list applied on each invocation.
    CallWith(TaskArgsFn<T>, Args),

    /// Operation already running; it cannot be re-invoked, so it is never retried.
    Started(JoinHandle<TaskResult<T>>),
}

impl<T: Send + 'static> Task<T> {
    pub fn call<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Task::Call(Arc::new(move || -> TaskFuture<T> { Box::pin(f()) }))
    }

    pub fn call_with<F, Fut>(f: F, args: Args) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Task::CallWith(
            Arc::new(move |args: Args| -> TaskFuture<T> { Box::pin(f(args)) }),
            args,
        )
    }

    pub fn started(handle: JoinHandle<TaskResult<T>>) -> Self {
        Task::Started(handle)
    }

    /// Start `fut` on the runtime right away and hand the running operation over.
    pub fn spawn<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Task::Started(tokio::spawn(fut))
    }
}

impl<T> Task<T> {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Call(_) => TaskKind::Call,
            Task::CallWith(..) => TaskKind::CallWith,
            Task::Started(_) => TaskKind::Started,
        }
    }

    pub fn args(&self) -> Option<&Args> {
        match self {
            Task::CallWith(_, args) => Some(args),
            _ => None,
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind())
            .field("args", &self.args())
            .finish()
    }
}

/// Which shape a task was submitted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Call,
    CallWith,
    Started,
}

/// Description of the submitted work, handed to reporters as the `batch`
/// of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSpec {
    pub kind: TaskKind,
    pub args: Option<Args>,
}

/// Admission-time resolution of a [`Task`].
pub(crate) enum TaskBody<T> {
    Callable {
        call: TaskArgsFn<T>,
        args: Option<Args>,
        kind: TaskKind,
    },
    /// `None` once the handle has been taken by the completion handler.
    InFlight(Option<JoinHandle<TaskResult<T>>>),
}

impl<T: Send + 'static> From<Task<T>> for TaskBody<T> {
    fn from(task: Task<T>) -> Self {
        match task {
            Task::Call(f) => TaskBody::Callable {
                call: Arc::new(move |_args: Args| f()),
                args: None,
                kind: TaskKind::Call,
            },
            Task::CallWith(call, args) => TaskBody::Callable {
                call,
                args: Some(args),
                kind: TaskKind::CallWith,
            },
            Task::Started(handle) => TaskBody::InFlight(Some(handle)),
        }
    }
}

/// One invocation detached from its queue item.
///
/// Taking an attempt runs no user code, so it is safe under the executor
/// lock; the callable is only invoked by [`Attempt::run`].
pub(crate) enum Attempt<T> {
    Call { call: TaskArgsFn<T>, args: Args },
    InFlight(JoinHandle<TaskResult<T>>),
}

impl<T: Send + 'static> Attempt<T> {
    /// Drive the attempt on its own runtime task.
    ///
    /// A panic, whether raised while building the future or while polling
    /// it, surfaces as the `JoinError` of that task and becomes a failure.
    pub(crate) async fn run(self) -> TaskResult<T> {
        let handle = match self {
            Attempt::Call { call, args } => tokio::spawn(async move { call(args).await }),
            Attempt::InFlight(handle) => handle,
        };
        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(Box::new(join_err) as TaskError),
        }
    }
}

impl<T: Send + 'static> TaskBody<T> {
    /// Take the next attempt.
    ///
    /// Callables yield a fresh attempt every time; an in-flight handle is
    /// handed out exactly once.
    pub(crate) fn attempt(&mut self) -> Option<Attempt<T>> {
        match self {
            TaskBody::Callable { call, args, .. } => Some(Attempt::Call {
                call: Arc::clone(call),
                args: args.clone().unwrap_or_default(),
            }),
            TaskBody::InFlight(handle) => handle.take().map(Attempt::InFlight),
        }
    }

    /// A fresh body for another attempt, or `None` when the work cannot be re-invoked.
    pub(crate) fn retry_copy(&self) -> Option<TaskBody<T>> {
        match self {
            TaskBody::Callable { call, args, kind } => Some(TaskBody::Callable {
                call: Arc::clone(call),
                args: args.clone(),
                kind: *kind,
            }),
            TaskBody::InFlight(_) => None,
        }
    }

    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, TaskBody::Callable { .. })
    }
}

impl<T> TaskBody<T> {
    pub(crate) fn spec(&self) -> BatchSpec {
        match self {
            TaskBody::Callable { args, kind, .. } => BatchSpec {
                kind: *kind,
                args: args.clone(),
            },
            TaskBody::InFlight(_) => BatchSpec {
                kind: TaskKind::Started,
                args: None,
            },
        }
    }
}
