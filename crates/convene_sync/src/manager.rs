//! The engine's front door.

use std::sync::Arc;
use std::time::SystemTime;

use convene_records::{RemoteNotification, SyncOptions};
use convene_store::LocalStore;
use tracing::info;

use crate::compose::{
    DiscoveryComposition, EntitySyncComposition, NotificationComposition, SetupComposition,
    UserSyncComposition,
};
use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::entity::EntityRegistry;
use crate::error::SyncResult;
use crate::link::{link_handles, link_transform};
use crate::ops::{
    CleanupOperation, CompletionOperation, InfoSource, SyncCompletion, UpdateSubscriptionOperation,
};
use crate::progress::Progress;
use crate::queue::{collect_dependencies, QueuePriority, WorkQueue};
use crate::rate_limit::RateLimiter;
use crate::service::RemoteService;
use crate::settings::SettingsStore;
use crate::task::TaskHandle;

/// Builds, labels and queues the workflow runs behind each public entry
/// point, and gates them behind any backoff the remote asked for.
///
/// Every run follows the same shape: the setup chain, an entry-specific
/// graph, then the cleanup and completion stages. The cleanup and
/// completion edges never propagate errors, so the terminal stages run no
/// matter how the run went, and [`collect_dependencies`] off the
/// completion stage is the full task set to submit.
///
/// Entry points return `None`, after reporting through the completion
/// callback, when a previous run's backoff window is still open; the
/// remote is not touched in that case. Otherwise they return a
/// [`Progress`] covering the whole run, whose
/// [`cancel`](Progress::cancel) reaches every queued task.
pub struct SyncManager {
    remote: Arc<dyn RemoteService>,
    store: Arc<LocalStore>,
    registry: Arc<EntityRegistry>,
    settings: Arc<dyn SettingsStore>,
    config: SyncConfig,
    limiter: Arc<RateLimiter>,
    queue: WorkQueue,
}

impl SyncManager {
    /// Creates a manager over the given remote, store and settings.
    pub fn new(
        remote: Arc<dyn RemoteService>,
        store: Arc<LocalStore>,
        settings: Arc<dyn SettingsStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;
        let queue = WorkQueue::new(config.queue_limits);
        Ok(SyncManager {
            remote,
            store,
            registry: Arc::new(EntityRegistry::standard()),
            settings,
            config,
            limiter: Arc::new(RateLimiter::new()),
            queue,
        })
    }

    /// When the last full sync finished, if one ever did.
    pub fn last_full_sync(&self) -> Option<SystemTime> {
        self.settings.last_full_sync()
    }

    /// Queues a synchronization run.
    ///
    /// The run pushes local changes in both scopes, pulls friends' events
    /// according to `options` and reconciles the event subscription. A
    /// successful run with both full-sync options set records the time
    /// under the settings store.
    pub fn synchronize(
        &self,
        options: SyncOptions,
        priority: QueuePriority,
        completion: SyncCompletion,
    ) -> Option<Progress> {
        let completion = self.noting_full_sync(options, completion);
        let (context, completion) = self.admit(completion)?;

        let setup = self.setup(&context);
        let entities = EntitySyncComposition::new(
            Arc::clone(&context),
            Arc::clone(&self.remote),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
            &self.config,
            options,
        );
        link_handles(&setup.last(), &entities.first(), true);

        // Anything beyond an incremental push refreshes the signed-in
        // user's own private record alongside the friends' data.
        if options.intersects(SyncOptions::FETCH_ALL | SyncOptions::REFRESH_ALL) {
            let fallback = Arc::clone(&context);
            link_transform(
                setup.link_user(),
                entities.pipeline_private(),
                move |link, pipeline| {
                    let resolved = link
                        .resolved()
                        .map(|(id, _)| id)
                        .or_else(|| fallback.current_user_id());
                    let Some(id) = resolved else { return };
                    pipeline.with_pending(|pending| {
                        if let Some(local) = link.linked_user() {
                            pending.map_local(id.clone(), local);
                        }
                        pending.add_fetch(id);
                    });
                },
            );
        }

        let subscription = UpdateSubscriptionOperation::new(
            Arc::clone(&context),
            Arc::clone(&self.remote),
            Arc::clone(&self.settings),
            &self.config,
            options,
        );
        link_transform(entities.users_with_friends(), &subscription, |select, update| {
            update.set_owners(select.owners().into_iter().map(|(id, _)| id).collect());
        });

        let terminal = self.finish_stage(
            &context,
            completion,
            vec![entities.last(), Arc::clone(&subscription) as TaskHandle],
        );
        self.launch(&format!("synchronize.{}", options.label()), priority, terminal)
    }

    /// Queues the targeted run for one push notification.
    ///
    /// Notifications the engine cannot act on, because they belong to a
    /// foreign subscription or name no record, are reported as
    /// unsupported-workflow failures.
    pub fn fetch_changes(
        &self,
        notification: RemoteNotification,
        priority: QueuePriority,
        completion: SyncCompletion,
    ) -> Option<Progress> {
        let (context, completion) = self.admit(completion)?;

        let setup = self.setup(&context);
        let targeted = NotificationComposition::new(
            Arc::clone(&context),
            Arc::clone(&self.remote),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            notification,
            &self.config,
        );
        link_handles(&setup.last(), &targeted.first(), true);

        let terminal = self.finish_stage(&context, completion, vec![targeted.last()]);
        self.launch("fetch-changes", priority, terminal)
    }

    /// Queues a run that asks for discoverability permission and pulls in
    /// every user already discoverable to the account.
    pub fn request_discoverability_permission(
        &self,
        priority: QueuePriority,
        completion: SyncCompletion,
    ) -> Option<Progress> {
        self.discover_and_sync(
            InfoSource::AllDiscoverable,
            "request-discoverability",
            priority,
            completion,
        )
    }

    /// Queues a run that resolves the given addresses into users and adds
    /// them to the signed-in user's friends.
    pub fn add_friends(
        &self,
        emails: Vec<String>,
        priority: QueuePriority,
        completion: SyncCompletion,
    ) -> Option<Progress> {
        self.discover_and_sync(InfoSource::Emails(emails), "add-friends", priority, completion)
    }

    fn discover_and_sync(
        &self,
        source: InfoSource,
        group: &str,
        priority: QueuePriority,
        completion: SyncCompletion,
    ) -> Option<Progress> {
        let (context, completion) = self.admit(completion)?;

        let setup = self.setup(&context);
        let discovery =
            DiscoveryComposition::new(Arc::clone(&context), Arc::clone(&self.remote), source);
        let users = UserSyncComposition::new(
            Arc::clone(&context),
            Arc::clone(&self.remote),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            &self.config,
        );
        link_handles(&setup.last(), &discovery.first(), true);
        link_transform(discovery.fetch_infos(), users.update_users(), |fetch, update| {
            update.set_infos(fetch.infos());
        });

        let terminal = self.finish_stage(&context, completion, vec![users.last()]);
        self.launch(group, priority, terminal)
    }

    /// Runs the backoff gate. On refusal the completion is invoked with
    /// the busy error and nothing is queued; otherwise a fresh context for
    /// the run comes back along with the untouched completion.
    fn admit(
        &self,
        completion: SyncCompletion,
    ) -> Option<(Arc<WorkflowContext>, SyncCompletion)> {
        if let Err(error) = self.limiter.permit_now() {
            info!(%error, "run refused, backoff window still open");
            completion(Err(error));
            return None;
        }
        Some((Arc::new(WorkflowContext::new()), completion))
    }

    fn setup(&self, context: &Arc<WorkflowContext>) -> SetupComposition {
        SetupComposition::new(
            Arc::clone(context),
            Arc::clone(&self.remote),
            Arc::clone(&self.store),
        )
    }

    /// Appends the cleanup and completion stages after `tails`. The edges
    /// never propagate errors; both stages must run however the run went.
    fn finish_stage(
        &self,
        context: &Arc<WorkflowContext>,
        completion: SyncCompletion,
        tails: Vec<TaskHandle>,
    ) -> TaskHandle {
        let cleanup = CleanupOperation::new(Arc::clone(context), Arc::clone(&self.limiter));
        let cleanup_handle = Arc::clone(&cleanup) as TaskHandle;
        for tail in &tails {
            link_handles(tail, &cleanup_handle, false);
        }

        let report = CompletionOperation::new(Arc::clone(context), completion);
        let report_handle = Arc::clone(&report) as TaskHandle;
        link_handles(&cleanup_handle, &report_handle, false);
        report_handle
    }

    /// Labels every task in `terminal`'s dependency closure with `group`,
    /// gathers them under one progress parent and submits them.
    fn launch(&self, group: &str, priority: QueuePriority, terminal: TaskHandle) -> Option<Progress> {
        let tasks = collect_dependencies(&terminal);
        let progress = Progress::new(0);
        for task in &tasks {
            task.meta().set_group(group);
            progress.add_child(task.meta().progress().clone());
        }
        info!(
            group,
            priority = priority.label(),
            tasks = tasks.len(),
            "queued workflow run"
        );
        self.queue.submit(tasks, priority);
        Some(progress)
    }

    /// Wraps `completion` so a successful full sync stamps the settings
    /// store before the caller hears about it.
    fn noting_full_sync(&self, options: SyncOptions, completion: SyncCompletion) -> SyncCompletion {
        if !options.is_full_sync() {
            return completion;
        }
        let settings = Arc::clone(&self.settings);
        Box::new(move |result| {
            if result.is_ok() {
                settings.set_last_full_sync(SystemTime::now());
            }
            completion(result);
        })
    }
}
