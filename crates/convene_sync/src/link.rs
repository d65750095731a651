//! Links between workflow tasks.
//!
//! A link makes one task depend on another and carries the policy applied
//! when the source completes: error propagation, context-error
//! cancellation, and an optional data hand-off transform that runs only
//! when both ends are healthy.

use std::sync::Arc;

use convene_records::ServiceError;
use tracing::{debug, error, trace};

use crate::error::SyncError;
use crate::task::{TaskHandle, WorkflowTask};

type Transform = Box<dyn Fn() + Send + Sync>;

/// One directed edge from a completed source task to a dependent target.
///
/// Stored on the source and evaluated by the queue driver after the source
/// finishes, before dependents are released.
pub struct WorkflowLink {
    cancel_on_error: bool,
    source: TaskHandle,
    target: TaskHandle,
    transform: Option<Transform>,
}

impl WorkflowLink {
    /// Applies the edge policy, in order:
    ///
    /// 1. source finished with an error and the edge propagates errors:
    ///    cancel the target;
    /// 2. the workflow context holds an error and the target cancels on
    ///    context errors: cancel the target;
    /// 3. neither end is cancelled: run the transform.
    ///
    /// The source's error stays recorded in all branches.
    pub(crate) fn follow(&self) {
        let source = self.source.meta();
        let target = self.target.meta();

        if self.cancel_on_error {
            if let Some(outcome) = source.outcome() {
                if let SyncError::Service(ServiceError::ServerRejected { message }) = &outcome {
                    error!(
                        from = source.name(),
                        to = target.name(),
                        %message,
                        "server rejected request, cancelling dependent"
                    );
                } else {
                    debug!(
                        from = source.name(),
                        to = target.name(),
                        error = %outcome,
                        "cancelling dependent after failed predecessor"
                    );
                }
                target.cancel();
                return;
            }
        }

        if target.cancels_on_context_error() {
            if let Some(error) = source.context().first_error() {
                debug!(
                    from = source.name(),
                    to = target.name(),
                    %error,
                    "cancelling dependent, workflow already failed"
                );
                target.cancel();
                return;
            }
        }

        if !source.is_cancelled() && !target.is_cancelled() {
            if let Some(transform) = &self.transform {
                transform();
            }
            trace!(from = source.name(), to = target.name(), "link followed");
        }
    }
}

/// Links `target` after `source` with error propagation and no transform.
pub fn link<A, B>(source: &Arc<A>, target: &Arc<B>)
where
    A: WorkflowTask + 'static,
    B: WorkflowTask + 'static,
{
    link_with(source, target, true, None::<fn(&A, &B)>);
}

/// Links `target` after `source` with error propagation and a transform
/// that hands data from `source` to `target` once `source` succeeds.
pub fn link_transform<A, B, F>(source: &Arc<A>, target: &Arc<B>, transform: F)
where
    A: WorkflowTask + 'static,
    B: WorkflowTask + 'static,
    F: Fn(&A, &B) + Send + Sync + 'static,
{
    link_with(source, target, true, Some(transform));
}

/// Links `target` after `source` with explicit edge policy.
///
/// `cancel_on_error: false` keeps the target alive when the source fails;
/// the target's own context-error policy still applies.
pub fn link_with<A, B, F>(source: &Arc<A>, target: &Arc<B>, cancel_on_error: bool, transform: Option<F>)
where
    A: WorkflowTask + 'static,
    B: WorkflowTask + 'static,
    F: Fn(&A, &B) + Send + Sync + 'static,
{
    let source_handle: TaskHandle = Arc::clone(source) as TaskHandle;
    let target_handle: TaskHandle = Arc::clone(target) as TaskHandle;
    target.meta().add_dependency(Arc::clone(&source_handle));

    let transform = transform.map(|f| {
        let source = Arc::clone(source);
        let target = Arc::clone(target);
        Box::new(move || f(&source, &target)) as Transform
    });

    source.meta().add_link(WorkflowLink {
        cancel_on_error,
        source: source_handle,
        target: target_handle,
        transform,
    });
}

/// Links two tasks through type-erased handles, without a transform.
pub fn link_handles(source: &TaskHandle, target: &TaskHandle, cancel_on_error: bool) {
    target.meta().add_dependency(Arc::clone(source));
    source.meta().add_link(WorkflowLink {
        cancel_on_error,
        source: Arc::clone(source),
        target: Arc::clone(target),
        transform: None,
    });
}
