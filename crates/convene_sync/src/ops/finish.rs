//! The tail of every workflow run: backoff capture and result reporting.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::context::WorkflowContext;
use crate::error::{SyncError, SyncResult};
use crate::rate_limit::RateLimiter;
use crate::task::{TaskMeta, WorkflowTask};

/// Callback a workflow run reports its terminal result through. Invoked
/// exactly once, on success, failure or cancellation.
pub type SyncCompletion = Box<dyn FnOnce(SyncResult<()>) + Send + 'static>;

/// Busy-family failures carrying a retry hint are reported as the canonical
/// busy error; everything else passes through unchanged.
fn terminal_error(error: SyncError) -> SyncError {
    match error.retry_after() {
        Some(retry_after) => SyncError::CloudBusy { retry_after },
        None => error,
    }
}

/// Inspects the run's terminal error and captures any backoff the remote
/// asked for into the manager's rate limiter.
///
/// Every operation of a run is a (transitive) dependency of its cleanup, so
/// this runs last no matter how the run went; it never cancels on context
/// errors since those are exactly what it is here to examine.
pub struct CleanupOperation {
    meta: TaskMeta,
    limiter: Arc<RateLimiter>,
}

impl CleanupOperation {
    /// Creates the cleanup stage backed by the manager's rate limiter.
    pub fn new(context: Arc<WorkflowContext>, limiter: Arc<RateLimiter>) -> Arc<Self> {
        Arc::new(CleanupOperation {
            meta: TaskMeta::new("finish.cleanup", context).ignoring_context_errors(),
            limiter,
        })
    }
}

#[async_trait]
impl WorkflowTask for CleanupOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        let Some(first) = self.meta.context().first_error() else {
            self.meta.finish();
            return;
        };
        match first.retry_after() {
            Some(retry_after) => {
                info!(?retry_after, "remote asked for backoff, gating future runs");
                self.limiter.note_backoff(retry_after);
                self.meta
                    .finish_with_error(SyncError::CloudBusy { retry_after });
            }
            None => self.meta.finish_with_error(first),
        }
    }
}

/// Delivers the run's result to the caller's completion callback, exactly
/// once.
///
/// Cancellation is reported as a cancellation error wrapping whatever the
/// run had accumulated; busy-family failures arrive as the canonical busy
/// error so callers can read the retry window off one variant.
pub struct CompletionOperation {
    meta: TaskMeta,
    completion: Mutex<Option<SyncCompletion>>,
}

impl CompletionOperation {
    /// Creates the reporting stage around `completion`.
    pub fn new(context: Arc<WorkflowContext>, completion: SyncCompletion) -> Arc<Self> {
        let op = Arc::new(CompletionOperation {
            meta: TaskMeta::new("finish.completion", context).ignoring_context_errors(),
            completion: Mutex::new(Some(completion)),
        });
        // A run cancelled before this task is driven never executes the
        // body; the hook keeps the exactly-once delivery promise.
        let hooked = Arc::downgrade(&op);
        op.meta.progress().on_cancel(move || {
            if let Some(op) = hooked.upgrade() {
                op.deliver(Err(SyncError::cancelled(op.meta.context().first_error())));
            }
        });
        op
    }

    fn result(&self) -> SyncResult<()> {
        if self.meta.is_cancelled() {
            return Err(SyncError::cancelled(self.meta.context().first_error()));
        }
        match self.meta.context().first_error() {
            None => Ok(()),
            Some(first) => Err(terminal_error(first)),
        }
    }

    fn deliver(&self, result: SyncResult<()>) {
        let Some(completion) = self.completion.lock().take() else {
            return;
        };
        match &result {
            Ok(()) => info!("synchronization workflow succeeded"),
            Err(error) => error!(%error, "synchronization workflow failed"),
        }
        completion(result);
    }
}

#[async_trait]
impl WorkflowTask for CompletionOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        self.deliver(self.result());
        self.meta.finish();
    }
}
