//! The record graph behind a synchronize run.

use std::sync::Arc;

use convene_records::{Scope, SyncOptions};
use convene_store::{EntityKind, LocalStore};

use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::entity::EntityRegistry;
use crate::link::{link, link_transform};
use crate::ops::{CollectChangesOperation, PrepareEventQueriesOperation, UsersWithFriendsOperation};
use crate::pipeline::RecordSyncOperation;
use crate::service::RemoteService;
use crate::settings::SettingsStore;
use crate::task::TaskHandle;

use super::queue_collected;

/// Private user sync, friend selection, then public user and event sync.
///
/// The private scope syncs first so the friend list is settled before the
/// public pass decides whose events to pull. When
/// [`SyncOptions::FETCH_ALL`] is set, a prepare stage turns the selected
/// friends into event queries for the public pipeline; otherwise only
/// records already referenced locally are synced.
pub struct EntitySyncComposition {
    collect_private: Arc<CollectChangesOperation>,
    pipeline_private: Arc<RecordSyncOperation>,
    users_with_friends: Arc<UsersWithFriendsOperation>,
    pipeline_public: Arc<RecordSyncOperation>,
}

impl EntitySyncComposition {
    /// Builds and wires the graph for `options`.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        settings: Arc<dyn SettingsStore>,
        config: &SyncConfig,
        options: SyncOptions,
    ) -> Self {
        let collect_private = CollectChangesOperation::new(
            Scope::Private,
            Arc::clone(&context),
            Arc::clone(&store),
            Arc::clone(&registry),
            options,
        );
        collect_private.set_kinds(vec![EntityKind::User]);
        let pipeline_private = RecordSyncOperation::new(
            Scope::Private,
            Arc::clone(&context),
            Arc::clone(&remote),
            Arc::clone(&store),
            Arc::clone(&registry),
            config,
        );
        let users_with_friends =
            UsersWithFriendsOperation::new(Arc::clone(&context), Arc::clone(&store));
        let collect_public = CollectChangesOperation::new(
            Scope::Public,
            Arc::clone(&context),
            Arc::clone(&store),
            Arc::clone(&registry),
            options,
        );
        collect_public.set_kinds(vec![EntityKind::User, EntityKind::SharedEvent]);
        let pipeline_public = RecordSyncOperation::new(
            Scope::Public,
            Arc::clone(&context),
            remote,
            Arc::clone(&store),
            Arc::clone(&registry),
            config,
        );

        queue_collected(&collect_private, &pipeline_private);
        link(&pipeline_private, &users_with_friends);
        link(&users_with_friends, &collect_public);

        if options.contains(SyncOptions::FETCH_ALL) {
            let prepare =
                PrepareEventQueriesOperation::new(context, store, registry, settings, options);
            link_transform(&users_with_friends, &prepare, |select, prepare| {
                prepare.set_owners(select.owners());
            });
            link_transform(&prepare, &pipeline_public, |prepare, pipeline| {
                prepare.with_pending(|gathered| {
                    pipeline.with_pending(|pending| pending.extend_from(gathered));
                });
            });
        }

        queue_collected(&collect_public, &pipeline_public);

        EntitySyncComposition {
            collect_private,
            pipeline_private,
            users_with_friends,
            pipeline_public,
        }
    }

    /// The graph's entry task.
    pub fn first(&self) -> TaskHandle {
        Arc::clone(&self.collect_private) as TaskHandle
    }

    /// The graph's final task.
    pub fn last(&self) -> TaskHandle {
        Arc::clone(&self.pipeline_public) as TaskHandle
    }

    /// The friend selection stage, for feeding owner-derived stages.
    pub fn users_with_friends(&self) -> &Arc<UsersWithFriendsOperation> {
        &self.users_with_friends
    }

    /// The private pipeline, for seeding extra fetches before the run.
    pub fn pipeline_private(&self) -> &Arc<RecordSyncOperation> {
        &self.pipeline_private
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_records::{normalized_identity, ModifyOutcome, ServiceError};
    use convene_store::User;

    use crate::entity::ensure_reference;
    use crate::error::SyncError;
    use crate::queue::{collect_dependencies, QueuePriority, WorkQueue};
    use crate::service::MockRemote;
    use crate::settings::MemorySettings;

    struct Fixture {
        remote: Arc<MockRemote>,
        store: Arc<LocalStore>,
        context: Arc<WorkflowContext>,
        settings: Arc<MemorySettings>,
        linked: convene_store::LocalId,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MockRemote::new());
        let store = Arc::new(LocalStore::new());
        let context = Arc::new(WorkflowContext::new());
        let linked = store
            .with_transaction(|txn| {
                let linked = txn.add_user(User::new());
                ensure_reference(txn, linked, Scope::Private)?;
                ensure_reference(txn, linked, Scope::Public)?;
                Ok::<_, SyncError>(linked)
            })
            .unwrap();
        context.set_linked_local_user(linked);
        Fixture {
            remote,
            store,
            context,
            settings: Arc::new(MemorySettings::new()),
            linked,
        }
    }

    fn composition(fx: &Fixture, options: SyncOptions) -> EntitySyncComposition {
        EntitySyncComposition::new(
            Arc::clone(&fx.context),
            fx.remote.clone(),
            Arc::clone(&fx.store),
            Arc::new(EntityRegistry::standard()),
            fx.settings.clone(),
            &SyncConfig::default(),
            options,
        )
    }

    async fn run_graph(last: TaskHandle) {
        let queue = WorkQueue::default();
        queue.submit(collect_dependencies(&last), QueuePriority::Default);
        last.meta().wait_done().await;
    }

    #[tokio::test]
    async fn incremental_run_pushes_local_changes() {
        let fx = fixture();
        let graph = composition(&fx, SyncOptions::default());
        run_graph(graph.last()).await;

        assert!(!fx.context.has_error());
        // Both scopes pushed the dirty user and acknowledged the echo.
        fx.store.read(|txn| {
            let private = txn.reference(fx.linked, Scope::Private).unwrap();
            let public = txn.reference(fx.linked, Scope::Public).unwrap();
            assert!(private.synchronized);
            assert!(public.synchronized);
        });
        assert_eq!(fx.remote.call_count("query_records"), 0);
    }

    #[tokio::test]
    async fn fetch_all_queries_friend_events() {
        let fx = fixture();
        let graph = composition(&fx, SyncOptions::FETCH_ALL);
        run_graph(graph.last()).await;

        assert!(!fx.context.has_error());
        assert!(fx.remote.call_count("query_records") >= 1);
        let public_id = fx
            .store
            .read(|txn| txn.reference(fx.linked, Scope::Public).map(|r| r.record_id.clone()))
            .unwrap();
        assert_eq!(
            fx.settings.fetched_users(),
            std::iter::once(normalized_identity(&public_id)).collect()
        );
    }

    #[tokio::test]
    async fn private_failure_cancels_the_public_pass() {
        let fx = fixture();
        fx.remote
            .push_modify_outcome(ModifyOutcome::failed(ServiceError::network("socket closed")));
        let graph = composition(&fx, SyncOptions::default());
        run_graph(graph.last()).await;

        assert!(fx.context.has_error());
        // The public pipeline was cancelled, not run.
        assert_eq!(fx.remote.call_count("modify_records"), 1);
        fx.store.read(|txn| {
            assert!(!txn.reference(fx.linked, Scope::Public).unwrap().synchronized);
        });
    }
}
