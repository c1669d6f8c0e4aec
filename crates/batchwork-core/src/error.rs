use std::sync::Arc;

use thiserror::Error;

use crate::domain::ItemId;

/// Error produced by a task body.
///
/// Task bodies are opaque to the executors, so any error type is accepted.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A task error shared between every reporter that observes the same failure.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Result returned by task bodies.
pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid option {field}: {message}")]
    InvalidOptions {
        field: &'static str,
        message: String,
    },

    #[error("unknown manager mode: {0}")]
    UnknownMode(String),

    #[error("manager {0} is retired")]
    Retired(String),

    #[error("in-flight operation of {0} was already consumed")]
    HandleConsumed(ItemId),

    #[error("failed to decode manager options: {0}")]
    Options(#[from] serde_json::Error),
}

impl BatchError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        BatchError::InvalidOptions {
            field,
            message: message.into(),
        }
    }
}

/// Convert an owned task error into one that can be handed to several reporters.
pub(crate) fn share(err: TaskError) -> SharedError {
    Arc::from(err)
}
