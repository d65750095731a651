//! The record graph that lands discovered users in both scopes.

use std::sync::Arc;

use convene_records::{Scope, SyncOptions};
use convene_store::{EntityKind, LocalStore};

use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::entity::EntityRegistry;
use crate::link::link;
use crate::ops::{CollectChangesOperation, UpdateUserInfosOperation};
use crate::pipeline::RecordSyncOperation;
use crate::service::RemoteService;
use crate::task::TaskHandle;

use super::queue_collected;

/// Applies fetched user infos to the store, then syncs user records in
/// both scopes.
///
/// The private pass collects every user reference regardless of its
/// synchronized flag: info updates touch users whose references were
/// already settled, and a stale skip here would strand the new friend
/// list locally.
pub struct UserSyncComposition {
    update_users: Arc<UpdateUserInfosOperation>,
    pipeline_public: Arc<RecordSyncOperation>,
}

impl UserSyncComposition {
    /// Builds and wires the graph.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        config: &SyncConfig,
    ) -> Self {
        let update_users =
            UpdateUserInfosOperation::new(Arc::clone(&context), Arc::clone(&store));
        let collect_private = CollectChangesOperation::new(
            Scope::Private,
            Arc::clone(&context),
            Arc::clone(&store),
            Arc::clone(&registry),
            SyncOptions::REFRESH_ALL,
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
        let collect_public = CollectChangesOperation::new(
            Scope::Public,
            Arc::clone(&context),
            Arc::clone(&store),
            Arc::clone(&registry),
            SyncOptions::default(),
        );
        collect_public.set_kinds(vec![EntityKind::User]);
        let pipeline_public = RecordSyncOperation::new(
            Scope::Public,
            context,
            remote,
            store,
            registry,
            config,
        );

        link(&update_users, &collect_private);
        queue_collected(&collect_private, &pipeline_private);
        link(&pipeline_private, &collect_public);
        queue_collected(&collect_public, &pipeline_public);

        UserSyncComposition {
            update_users,
            pipeline_public,
        }
    }

    /// The graph's entry task.
    pub fn first(&self) -> TaskHandle {
        Arc::clone(&self.update_users) as TaskHandle
    }

    /// The graph's final task.
    pub fn last(&self) -> TaskHandle {
        Arc::clone(&self.pipeline_public) as TaskHandle
    }

    /// The info application stage, for feeding fetched infos in.
    pub fn update_users(&self) -> &Arc<UpdateUserInfosOperation> {
        &self.update_users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_records::{RecordId, RemoteUserInfo};
    use convene_store::User;

    use crate::entity::ensure_reference;
    use crate::error::SyncError;
    use crate::queue::{collect_dependencies, QueuePriority, WorkQueue};
    use crate::service::MockRemote;

    async fn run_graph(last: TaskHandle) {
        let queue = WorkQueue::default();
        queue.submit(collect_dependencies(&last), QueuePriority::Default);
        last.meta().wait_done().await;
    }

    #[tokio::test]
    async fn discovered_friend_is_created_and_pushed() {
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

        let graph = UserSyncComposition::new(
            Arc::clone(&context),
            remote.clone(),
            Arc::clone(&store),
            Arc::new(EntityRegistry::standard()),
            &SyncConfig::default(),
        );
        graph.update_users().set_infos(vec![RemoteUserInfo {
            record_id: RecordId::in_default_zone("friend-1"),
            first_name: Some("Ada".to_string()),
            last_name: None,
        }]);
        run_graph(graph.last()).await;

        assert!(!context.has_error());
        store.read(|txn| {
            let friend = txn.entity_for_record(&RecordId::in_default_zone("friend-1"), Scope::Public);
            let friend = friend.unwrap();
            assert!(txn.user(linked).unwrap().has_friend(friend));
            // Both the friend entry and the linked user's new friend list
            // made it out.
            assert!(txn.reference(linked, Scope::Private).unwrap().synchronized);
        });
        assert!(remote.call_count("modify_records") >= 1);
    }
}
