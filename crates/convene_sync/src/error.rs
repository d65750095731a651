//! Error types for the sync engine.

use std::time::Duration;

use convene_records::{AccountStatus, PermissionStatus, RecordError, ServiceError};
use convene_store::StoreError;
use thiserror::Error;

/// Convenience alias used throughout the engine.
pub type SyncResult<T> = Result<T, SyncError>;

/// Terminal error taxonomy reported to callers of the [`SyncManager`].
///
/// Workflow operations record at most one of these; the first error recorded
/// into a [`WorkflowContext`] wins and is what the completion handler sees.
///
/// [`SyncManager`]: crate::SyncManager
/// [`WorkflowContext`]: crate::WorkflowContext
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The remote asked clients to back off. Callers must not retry before
    /// the embedded window has elapsed.
    #[error("cloud busy, retry after {retry_after:?}")]
    CloudBusy {
        /// How long to wait before the next attempt.
        retry_after: Duration,
    },

    /// An internal invariant did not hold. Not recoverable by retrying.
    #[error("internal inconsistency: {reason}")]
    InternalInconsistency {
        /// Description of the violated invariant.
        reason: String,
    },

    /// The requested flow cannot be performed with the given input.
    #[error("unsupported workflow: {reason}")]
    UnsupportedWorkflow {
        /// Why the flow was rejected.
        reason: String,
    },

    /// The account cannot write to the remote in its current state.
    #[error("updates not permitted for account status {status}")]
    UpdatesNotPermitted {
        /// Account status reported by the remote.
        status: AccountStatus,
    },

    /// Friend discovery needs discoverability permission and the user has
    /// not granted it.
    #[error("discoverability permission not granted ({status:?})")]
    PermissionNotGranted {
        /// Status the permission request ended with.
        status: PermissionStatus,
    },

    /// The operation was cancelled before it could finish, optionally
    /// wrapping the error it was finishing with when cancellation hit.
    #[error("operation cancelled")]
    OperationCancelled {
        /// Error the operation carried at cancellation time, if any.
        underlying: Option<Box<SyncError>>,
    },

    /// A remote service call failed.
    #[error("remote service: {0}")]
    Service(#[from] ServiceError),

    /// A local store operation failed.
    #[error("local store: {0}")]
    Store(#[from] StoreError),

    /// Record metadata could not be encoded or decoded.
    #[error("record metadata: {0}")]
    Record(#[from] RecordError),

    /// A filesystem interaction failed (settings persistence).
    #[error("i/o: {message}")]
    Io {
        /// Underlying error description.
        message: String,
    },
}

impl SyncError {
    /// Builds an [`SyncError::InternalInconsistency`].
    pub fn internal_inconsistency(reason: impl Into<String>) -> Self {
        SyncError::InternalInconsistency {
            reason: reason.into(),
        }
    }

    /// Builds an [`SyncError::UnsupportedWorkflow`].
    pub fn unsupported_workflow(reason: impl Into<String>) -> Self {
        SyncError::UnsupportedWorkflow {
            reason: reason.into(),
        }
    }

    /// Builds an [`SyncError::OperationCancelled`], wrapping `underlying`
    /// when the operation was carrying an error of its own.
    pub fn cancelled(underlying: Option<SyncError>) -> Self {
        SyncError::OperationCancelled {
            underlying: underlying.map(Box::new),
        }
    }

    /// Builds an [`SyncError::Io`] from any I/O error.
    pub fn io(error: std::io::Error) -> Self {
        SyncError::Io {
            message: error.to_string(),
        }
    }

    /// True for cancellation outcomes.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::OperationCancelled { .. })
    }

    /// The backoff window carried by this error, if it represents a
    /// busy condition from the remote.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::CloudBusy { retry_after } => Some(*retry_after),
            SyncError::Service(error) => error.retry_after(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_wraps_underlying_error() {
        let inner = SyncError::unsupported_workflow("bad input");
        let wrapped = SyncError::cancelled(Some(inner.clone()));
        assert!(wrapped.is_cancelled());
        match wrapped {
            SyncError::OperationCancelled { underlying } => {
                assert_eq!(underlying.as_deref(), Some(&inner));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn retry_after_surfaces_through_service_errors() {
        let window = Duration::from_secs(42);
        let service = SyncError::Service(ServiceError::rate_limited(window));
        assert_eq!(service.retry_after(), Some(window));

        let busy = SyncError::CloudBusy {
            retry_after: window,
        };
        assert_eq!(busy.retry_after(), Some(window));

        assert_eq!(
            SyncError::internal_inconsistency("nope").retry_after(),
            None
        );
    }
}
