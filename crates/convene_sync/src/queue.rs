//! Priority work queue for workflow tasks.
//!
//! Tasks are spawned immediately but hold a per-tier concurrency permit
//! while their body runs. Dependency waits happen before the permit is
//! taken, so a narrow tier cannot deadlock a dependency chain.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{trace, warn, Instrument};

use crate::task::TaskHandle;

/// Scheduling tiers, from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePriority {
    /// Work the user is actively waiting on.
    UserInitiated,
    /// Regular foreground synchronization.
    Default,
    /// Deferrable maintenance work.
    Utility,
    /// Opportunistic background work.
    Background,
}

impl QueuePriority {
    /// All tiers, most urgent first.
    pub const ALL: [QueuePriority; 4] = [
        QueuePriority::UserInitiated,
        QueuePriority::Default,
        QueuePriority::Utility,
        QueuePriority::Background,
    ];

    fn index(self) -> usize {
        match self {
            QueuePriority::UserInitiated => 0,
            QueuePriority::Default => 1,
            QueuePriority::Utility => 2,
            QueuePriority::Background => 3,
        }
    }

    /// Short label for logs.
    pub fn label(self) -> &'static str {
        match self {
            QueuePriority::UserInitiated => "user-initiated",
            QueuePriority::Default => "default",
            QueuePriority::Utility => "utility",
            QueuePriority::Background => "background",
        }
    }
}

/// Concurrency limits per tier, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits(pub [usize; 4]);

impl Default for QueueLimits {
    fn default() -> Self {
        QueueLimits([4, 4, 2, 1])
    }
}

/// Executes workflow tasks on the tokio runtime under per-tier limits.
pub struct WorkQueue {
    tiers: [Arc<Semaphore>; 4],
}

impl WorkQueue {
    /// Creates a queue with the given per-tier limits.
    pub fn new(limits: QueueLimits) -> Self {
        WorkQueue {
            tiers: limits.0.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Submits a set of tasks at one priority. Dependency order within the
    /// set is honored regardless of submission order.
    pub fn submit(&self, tasks: Vec<TaskHandle>, priority: QueuePriority) {
        for task in tasks {
            let permits = Arc::clone(&self.tiers[priority.index()]);
            tokio::spawn(drive(task, permits, priority));
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        WorkQueue::new(QueueLimits::default())
    }
}

/// Runs one task to completion: waits for predecessors, takes a tier
/// permit, runs the body unless cancelled, evaluates outgoing links and
/// then releases dependents.
pub(crate) async fn drive(task: TaskHandle, permits: Arc<Semaphore>, priority: QueuePriority) {
    for dependency in task.meta().dependencies() {
        dependency.meta().wait_done().await;
    }

    let span = tracing::info_span!(
        "workflow_task",
        task = task.meta().name(),
        group = %task.meta().group().unwrap_or_default(),
        priority = priority.label(),
    );

    let _permit = permits.acquire_owned().await.ok();

    async {
        if task.meta().is_cancelled() {
            trace!("skipping cancelled task");
            task.meta().finish();
        } else {
            Arc::clone(&task).execute().await;
        }

        if !task.meta().is_finished() {
            warn!("task body returned without finishing");
            task.meta().finish();
        }

        for link in task.meta().take_links() {
            link.follow();
        }
        task.meta().signal_done();
    }
    .instrument(span)
    .await;
}

/// The transitive dependency closure of `terminal`, including `terminal`
/// itself. This is the set the manager labels and submits per entry point.
pub fn collect_dependencies(terminal: &TaskHandle) -> Vec<TaskHandle> {
    let mut seen: Vec<TaskHandle> = vec![Arc::clone(terminal)];
    let mut frontier: Vec<TaskHandle> = vec![Arc::clone(terminal)];
    while let Some(task) = frontier.pop() {
        for dependency in task.meta().dependencies() {
            if !seen.iter().any(|known| Arc::ptr_eq(known, &dependency)) {
                seen.push(Arc::clone(&dependency));
                frontier.push(dependency);
            }
        }
    }
    seen
}
