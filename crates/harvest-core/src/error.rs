use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{InvalidTransition, JobId, JobStatus};

/// Failures of the persistent job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode queue state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Engine bug: a caller asked for an edge the state machine does not have.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(id: JobId, err: InvalidTransition) -> Self {
        Self::InvalidTransition {
            id,
            from: err.from,
            to: err.to,
        }
    }
}

/// What a handler can report instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Transient failure; retried while the job has budget left.
    #[error("{0}")]
    Failed(String),

    /// Never worth retrying (e.g. the target does not exist).
    #[error("{0}")]
    Permanent(String),

    /// The handler task panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor is already running")]
    AlreadyRunning,

    #[error("executor is not running")]
    NotRunning,

    #[error(transparent)]
    Store(#[from] StoreError),
}
