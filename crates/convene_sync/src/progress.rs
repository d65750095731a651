//! Hierarchical, cancellable progress reporting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type CancelHook = Box<dyn Fn() + Send + Sync>;

struct ProgressState {
    total: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicBool,
    cancel_hooks: Mutex<Vec<CancelHook>>,
    children: Mutex<Vec<Progress>>,
}

/// A cancellable progress handle.
///
/// Handles form a tree: each child contributes one unit to its parent and
/// reports its own fraction into that unit. Cancelling a handle runs its
/// registered hooks and cancels every child, which is how cancelling the
/// handle returned by the manager reaches each in-flight operation.
///
/// Cloning shares the underlying state.
#[derive(Clone)]
pub struct Progress {
    inner: Arc<ProgressState>,
}

impl Progress {
    /// Creates a handle with `total` units of its own work.
    pub fn new(total: u64) -> Self {
        Progress {
            inner: Arc::new(ProgressState {
                total: AtomicU64::new(total),
                completed: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
                cancel_hooks: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Adds `child` as one unit of this handle's work.
    pub fn add_child(&self, child: Progress) {
        self.inner.total.fetch_add(1, Ordering::SeqCst);
        if self.is_cancelled() {
            child.cancel();
        }
        self.inner.children.lock().push(child);
    }

    /// Marks `units` of own work complete.
    pub fn complete_units(&self, units: u64) {
        self.inner.completed.fetch_add(units, Ordering::SeqCst);
    }

    /// Marks all own work complete.
    pub fn complete_all(&self) {
        let total = self.inner.total.load(Ordering::SeqCst);
        let own = total - self.child_count();
        self.inner.completed.store(own, Ordering::SeqCst);
    }

    fn child_count(&self) -> u64 {
        self.inner.children.lock().len() as u64
    }

    /// Completed fraction in `0.0..=1.0`, children weighted as one unit each.
    pub fn fraction(&self) -> f64 {
        let total = self.inner.total.load(Ordering::SeqCst).max(1) as f64;
        let own = self.inner.completed.load(Ordering::SeqCst) as f64;
        let children: f64 = self
            .inner
            .children
            .lock()
            .iter()
            .map(Progress::fraction)
            .sum();
        ((own + children) / total).min(1.0)
    }

    /// Requests cancellation: runs hooks, then cancels children.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = self.inner.cancel_hooks.lock();
        for hook in hooks.iter() {
            hook();
        }
        drop(hooks);
        let children = self.inner.children.lock().clone();
        for child in children {
            child.cancel();
        }
    }

    /// True once [`cancel`](Progress::cancel) has been called on this handle
    /// or an ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers a hook to run on cancellation. Runs immediately when the
    /// handle is already cancelled, so late registration cannot miss it.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) {
        if self.is_cancelled() {
            hook();
            return;
        }
        self.inner.cancel_hooks.lock().push(Box::new(hook));
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("fraction", &self.fraction())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
