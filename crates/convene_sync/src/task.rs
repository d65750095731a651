//! Asynchronous workflow tasks.
//!
//! Every operation in the engine is a [`WorkflowTask`]: it carries a
//! [`TaskMeta`] with its shared bookkeeping and implements an async
//! `execute` body. Bodies signal completion through
//! [`TaskMeta::finish`] or [`TaskMeta::finish_with_error`], exactly once;
//! the driver in [`queue`](crate::queue) takes care of dependency waits,
//! link evaluation and the done signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::context::WorkflowContext;
use crate::error::SyncError;
use crate::link::WorkflowLink;
use crate::progress::Progress;

/// Shared handle to a task, usable across threads and link edges.
pub type TaskHandle = Arc<dyn WorkflowTask>;

/// A unit of asynchronous work with dependencies, links and exactly-once
/// completion.
#[async_trait]
pub trait WorkflowTask: Send + Sync {
    /// The task's shared bookkeeping.
    fn meta(&self) -> &TaskMeta;

    /// Runs the task body. Implementations must call
    /// [`TaskMeta::finish`] or [`TaskMeta::finish_with_error`] exactly once
    /// before returning.
    async fn execute(self: Arc<Self>);
}

/// Bookkeeping shared by all workflow tasks.
///
/// Owns the cancellation flag, the exactly-once completion outcome, the
/// done signal dependents wait on, outgoing links and the task's slice of
/// progress. The progress handle's cancellation feeds back into the task's
/// cancellation flag.
pub struct TaskMeta {
    name: &'static str,
    context: Arc<WorkflowContext>,
    cancel_on_context_error: bool,
    cancelled: Arc<AtomicBool>,
    finished: AtomicBool,
    outcome: Mutex<Option<SyncError>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    links: Mutex<Vec<WorkflowLink>>,
    dependencies: Mutex<Vec<TaskHandle>>,
    progress: Progress,
    group: Mutex<Option<String>>,
}

impl TaskMeta {
    /// Creates bookkeeping for a task named `name`.
    ///
    /// By default the task is cancelled when a linked predecessor observes
    /// an error anywhere in the workflow context; see
    /// [`ignoring_context_errors`](TaskMeta::ignoring_context_errors) for
    /// the tasks that must run regardless.
    pub fn new(name: &'static str, context: Arc<WorkflowContext>) -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        let cancelled = Arc::new(AtomicBool::new(false));
        let progress = Progress::new(1);
        let flag = Arc::clone(&cancelled);
        progress.on_cancel(move || {
            flag.store(true, Ordering::SeqCst);
        });
        TaskMeta {
            name,
            context,
            cancel_on_context_error: true,
            cancelled,
            finished: AtomicBool::new(false),
            outcome: Mutex::new(None),
            done_tx,
            done_rx,
            links: Mutex::new(Vec::new()),
            dependencies: Mutex::new(Vec::new()),
            progress,
            group: Mutex::new(None),
        }
    }

    /// Opts the task out of cancellation on workflow context errors.
    ///
    /// Used by the account status probe, the user id fetch and the cleanup
    /// stage, which must run even after an upstream failure.
    pub fn ignoring_context_errors(mut self) -> Self {
        self.cancel_on_context_error = false;
        self
    }

    /// Task name used in logs and spans.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The workflow context this task reads and reports into.
    pub fn context(&self) -> &Arc<WorkflowContext> {
        &self.context
    }

    /// Whether a predecessor's context-error check may cancel this task.
    pub fn cancels_on_context_error(&self) -> bool {
        self.cancel_on_context_error
    }

    /// The task's progress slice.
    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Diagnostic group label, set by the manager per entry point.
    pub fn group(&self) -> Option<String> {
        self.group.lock().clone()
    }

    /// Labels this task with a diagnostic group.
    pub fn set_group(&self, group: impl Into<String>) {
        *self.group.lock() = Some(group.into());
    }

    /// Requests cancellation. A cancelled task that has not started skips
    /// its body; a running body is expected to poll
    /// [`is_cancelled`](TaskMeta::is_cancelled) at its checkpoints.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// True once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the task has finished.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Marks the task successful, or cancelled when cancellation was
    /// requested first.
    pub fn finish(&self) {
        self.complete(None);
    }

    /// Marks the task failed. When cancellation was requested first the
    /// outcome becomes a cancellation wrapping `error`; otherwise `error`
    /// is recorded into the workflow context.
    pub fn finish_with_error(&self, error: SyncError) {
        self.complete(Some(error));
    }

    fn complete(&self, outcome: Option<SyncError>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            warn!(task = self.name, "finish called more than once, ignoring");
            return;
        }
        let recorded = match outcome {
            None if self.is_cancelled() => Some(SyncError::cancelled(None)),
            None => None,
            Some(error) if self.is_cancelled() => Some(SyncError::cancelled(Some(error))),
            Some(error) => {
                self.context.push_error(error.clone());
                Some(error)
            }
        };
        match &recorded {
            Some(error) if error.is_cancelled() => {
                debug!(task = self.name, "task cancelled");
            }
            Some(error) => {
                error!(task = self.name, %error, "task failed");
            }
            None => {}
        }
        *self.outcome.lock() = recorded;
        self.progress.complete_all();
    }

    /// The task's recorded outcome: `None` for success, the error or the
    /// cancellation otherwise. Meaningful once [`is_finished`] is true.
    ///
    /// [`is_finished`]: TaskMeta::is_finished
    pub fn outcome(&self) -> Option<SyncError> {
        self.outcome.lock().clone()
    }

    /// Adds a predecessor this task waits for.
    pub fn add_dependency(&self, dependency: TaskHandle) {
        self.dependencies.lock().push(dependency);
    }

    /// Snapshot of the task's direct predecessors.
    pub fn dependencies(&self) -> Vec<TaskHandle> {
        self.dependencies.lock().clone()
    }

    /// Registers an outgoing link, evaluated when this task completes.
    pub fn add_link(&self, link: WorkflowLink) {
        self.links.lock().push(link);
    }

    /// Drains the outgoing links for evaluation. Links fire at most once.
    pub(crate) fn take_links(&self) -> Vec<WorkflowLink> {
        std::mem::take(&mut *self.links.lock())
    }

    /// Signals dependents that this task is done and its links have been
    /// evaluated. Called by the queue driver.
    pub(crate) fn signal_done(&self) {
        let _ = self.done_tx.send(true);
    }

    /// Waits until [`signal_done`](TaskMeta::signal_done) has been called.
    pub async fn wait_done(&self) {
        let mut rx = self.done_rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}
