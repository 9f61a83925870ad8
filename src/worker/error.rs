use anyhow::Error as AnyError;
use std::fmt;

/// Outcome classification for worker updates and retried operations.
///
/// Only [`WorkerError::UpdateFailed`] and [`WorkerError::OperationFailed`] are
/// retried by [`retry_operation`](super::retry_operation). Any other variant
/// escaping a worker's update routine stops the worker.
#[derive(Debug)]
pub enum WorkerError {
    UpdateFailed(String),
    OperationFailed(String),
    RetriesExhausted { attempts: usize, last: Box<WorkerError> },
    Cancelled,
    Fatal(AnyError),
}

impl WorkerError {
    pub fn update_failed(message: impl Into<String>) -> Self {
        WorkerError::UpdateFailed(message.into())
    }

    pub fn operation_failed(message: impl Into<String>) -> Self {
        WorkerError::OperationFailed(message.into())
    }

    pub fn fatal(error: impl Into<AnyError>) -> Self {
        WorkerError::Fatal(error.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkerError::UpdateFailed(_) | WorkerError::OperationFailed(_)
        )
    }

    /// Number of attempts recorded by an exhausted retry loop.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            WorkerError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::UpdateFailed(message) => write!(f, "update failed: {message}"),
            WorkerError::OperationFailed(message) => write!(f, "operation failed: {message}"),
            WorkerError::RetriesExhausted { attempts, last } => {
                write!(f, "operation failed after {attempts} attempts: {last}")
            }
            WorkerError::Cancelled => write!(f, "operation cancelled by worker shutdown"),
            WorkerError::Fatal(err) => write!(f, "fatal worker error: {err}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::RetriesExhausted { last, .. } => Some(last.as_ref()),
            WorkerError::Fatal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
