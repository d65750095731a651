//! Working out whose shared events the public pipeline should query.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use convene_records::{
    normalized_identity, RecordId, RecordQuery, Scope, SyncOptions, EVENT_RECORD_TYPE,
};
use convene_store::{LocalId, LocalStore, StoreTxn};
use parking_lot::Mutex;
use tracing::debug;

use crate::context::WorkflowContext;
use crate::entity::{ensure_reference, EntityRegistry};
use crate::error::SyncResult;
use crate::pending::PendingChanges;
use crate::settings::SettingsStore;
use crate::task::{TaskMeta, WorkflowTask};

/// Finds the local users whose events are worth syncing: everyone with at
/// least one friend, plus the linked user themself.
///
/// Each selected user is guaranteed a public sync reference so later
/// operations can address them by record id.
pub struct UsersWithFriendsOperation {
    meta: TaskMeta,
    store: Arc<LocalStore>,
    owners: Mutex<Vec<(RecordId, LocalId)>>,
}

impl UsersWithFriendsOperation {
    /// Creates the selection operation.
    pub fn new(context: Arc<WorkflowContext>, store: Arc<LocalStore>) -> Arc<Self> {
        Arc::new(UsersWithFriendsOperation {
            meta: TaskMeta::new("users.with-friends", context),
            store,
            owners: Mutex::new(Vec::new()),
        })
    }

    /// The selected users as `(public record id, local id)` pairs.
    pub fn owners(&self) -> Vec<(RecordId, LocalId)> {
        self.owners.lock().clone()
    }

    fn select(&self, txn: &mut StoreTxn) -> SyncResult<Vec<(RecordId, LocalId)>> {
        let linked = self.meta.context().linked_local_user();
        let selected: Vec<LocalId> = txn
            .users()
            .filter(|user| !user.friends.is_empty() || linked == Some(user.id))
            .map(|user| user.id)
            .collect();

        let mut owners = Vec::with_capacity(selected.len());
        for entity in selected {
            let record_id = ensure_reference(txn, entity, Scope::Public)?;
            owners.push((record_id, entity));
        }
        Ok(owners)
    }
}

#[async_trait]
impl WorkflowTask for UsersWithFriendsOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.store.with_transaction(|txn| self.select(txn)) {
            Ok(owners) => {
                debug!(count = owners.len(), "selected event owners");
                *self.owners.lock() = owners;
                self.meta.finish();
            }
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}

/// Builds the shared-event query for a set of owners and maps their already
/// known events so query results land on the right local entities.
///
/// When the owner set matches the one from the previous run, the query is
/// narrowed to events created after the newest one the server has already
/// acknowledged. A changed owner set, or a full sync, forces an unbounded
/// query.
pub struct PrepareEventQueriesOperation {
    meta: TaskMeta,
    store: Arc<LocalStore>,
    registry: Arc<EntityRegistry>,
    settings: Arc<dyn SettingsStore>,
    options: SyncOptions,
    owners: Mutex<Vec<(RecordId, LocalId)>>,
    pending: Mutex<PendingChanges>,
}

impl PrepareEventQueriesOperation {
    /// Creates the query-preparation operation.
    pub fn new(
        context: Arc<WorkflowContext>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        settings: Arc<dyn SettingsStore>,
        options: SyncOptions,
    ) -> Arc<Self> {
        Arc::new(PrepareEventQueriesOperation {
            meta: TaskMeta::new("users.event-queries", context),
            store,
            registry,
            settings,
            options,
            owners: Mutex::new(Vec::new()),
            pending: Mutex::new(PendingChanges::new()),
        })
    }

    /// Supplies the owners whose events should be queried, usually linked
    /// from a [`UsersWithFriendsOperation`].
    pub fn set_owners(&self, owners: Vec<(RecordId, LocalId)>) {
        *self.owners.lock() = owners;
    }

    /// Runs a closure over the prepared query and record map.
    pub fn with_pending<T>(&self, work: impl FnOnce(&mut PendingChanges) -> T) -> T {
        work(&mut self.pending.lock())
    }

    fn prepare(&self, txn: &StoreTxn) -> SyncResult<()> {
        let owners = self.owners.lock().clone();
        if owners.is_empty() {
            debug!("no event owners, skipping the shared-event query");
            return Ok(());
        }

        let owner_ids: Vec<LocalId> = owners.iter().map(|(_, local)| *local).collect();
        let mut pending = self.pending.lock();
        let mut newest: Option<SystemTime> = None;
        for event in txn.events() {
            if !owner_ids.contains(&event.owner) {
                continue;
            }
            let Some(reference) = txn.reference(event.id, Scope::Public) else {
                continue;
            };
            pending.map_local(reference.record_id.clone(), event.id);
            if reference.change_tag().is_some() {
                newest = newest.max(Some(event.created_locally_at));
            }
        }

        let normalized: BTreeSet<String> = owners
            .iter()
            .map(|(record_id, _)| normalized_identity(record_id))
            .collect();
        let incremental =
            !self.options.is_full_sync() && normalized == self.settings.fetched_users();

        let record_ids = owners.into_iter().map(|(record_id, _)| record_id).collect();
        let mut query = RecordQuery::all(EVENT_RECORD_TYPE)
            .owned_by(record_ids)
            .with_desired_fields(self.registry.desired_fields(Scope::Public));
        match newest {
            Some(cutoff) if incremental => {
                debug!(?cutoff, "querying shared events incrementally");
                query = query.created_after(cutoff);
            }
            _ => debug!(
                mode = self.options.label(),
                "querying all shared events for the owner set"
            ),
        }
        pending.push_query(query);
        self.settings.set_fetched_users(normalized);
        Ok(())
    }
}

#[async_trait]
impl WorkflowTask for PrepareEventQueriesOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.store.read(|txn| self.prepare(txn)) {
            Ok(()) => self.meta.finish(),
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::settings::MemorySettings;
    use convene_records::RemoteRecord;
    use convene_store::{SharedEvent, User};

    struct Fixture {
        store: Arc<LocalStore>,
        context: Arc<WorkflowContext>,
        settings: Arc<MemorySettings>,
        linked: LocalId,
        friended: LocalId,
        event: LocalId,
    }

    /// A linked user without friends, a user with one friend and one event,
    /// and a loner who should never be selected.
    fn fixture() -> Fixture {
        let store = Arc::new(LocalStore::new());
        let context = Arc::new(WorkflowContext::new());
        let (linked, friended, event) = store
            .with_transaction(|txn| {
                let linked = txn.add_user(User::new());
                let mut friended_user = User::new();
                friended_user.friends.push(linked);
                let friended = txn.add_user(friended_user);
                txn.add_user(User::new());
                let event = txn.add_event(SharedEvent::new(friended, "test-device"));
                ensure_reference(txn, event, Scope::Public)?;
                Ok::<_, SyncError>((linked, friended, event))
            })
            .unwrap();
        context.set_linked_local_user(linked);
        Fixture {
            store,
            context,
            settings: Arc::new(MemorySettings::new()),
            linked,
            friended,
            event,
        }
    }

    fn prepare_op(fx: &Fixture, options: SyncOptions) -> Arc<PrepareEventQueriesOperation> {
        PrepareEventQueriesOperation::new(
            Arc::clone(&fx.context),
            Arc::clone(&fx.store),
            Arc::new(EntityRegistry::standard()),
            fx.settings.clone(),
            options,
        )
    }

    fn acknowledge_event(fx: &Fixture) {
        fx.store
            .with_transaction(|txn| {
                let record_id = txn
                    .reference(fx.event, Scope::Public)
                    .map(|reference| reference.record_id.clone())
                    .unwrap();
                let mut record = RemoteRecord::new(EVENT_RECORD_TYPE, record_id);
                record.change_tag = Some("tag-1".into());
                let reference = txn.reference_mut(fx.event, Scope::Public).unwrap();
                reference.store_record(&record)?;
                Ok::<_, SyncError>(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn selects_friended_users_and_the_linked_user() {
        let fx = fixture();
        let op = UsersWithFriendsOperation::new(Arc::clone(&fx.context), Arc::clone(&fx.store));

        op.clone().execute().await;

        assert!(op.meta().outcome().is_none());
        let owners = op.owners();
        let locals: Vec<LocalId> = owners.iter().map(|(_, local)| *local).collect();
        assert_eq!(owners.len(), 2, "linked user and the friended user");
        assert!(locals.contains(&fx.linked));
        assert!(locals.contains(&fx.friended));
        // Selection must have produced addressable public references.
        fx.store.read(|txn| {
            for (record_id, local) in &owners {
                let reference = txn.reference(*local, Scope::Public).unwrap();
                assert_eq!(&reference.record_id, record_id);
            }
        });
    }

    #[tokio::test]
    async fn changed_owner_set_queries_without_cutoff() {
        let fx = fixture();
        acknowledge_event(&fx);
        let op = prepare_op(&fx, SyncOptions::FETCH_ALL);
        let owners = {
            let select =
                UsersWithFriendsOperation::new(Arc::clone(&fx.context), Arc::clone(&fx.store));
            select.clone().execute().await;
            select.owners()
        };
        op.set_owners(owners.clone());

        op.clone().execute().await;

        op.with_pending(|pending| {
            assert_eq!(pending.queued_queries(), 1);
            let query = pending.next_query().unwrap();
            assert_eq!(query.record_type, EVENT_RECORD_TYPE);
            assert_eq!(query.filter.created_after, None, "first run fetches all");
            assert_eq!(query.filter.owned_by.as_ref().map(Vec::len), Some(2));
            assert!(!query.desired_fields.as_ref().unwrap().is_empty());
        });
        let expected: BTreeSet<String> = owners
            .iter()
            .map(|(record_id, _)| normalized_identity(record_id))
            .collect();
        assert_eq!(fx.settings.fetched_users(), expected);
    }

    #[tokio::test]
    async fn stable_owner_set_narrows_to_new_events() {
        let fx = fixture();
        acknowledge_event(&fx);
        let select = UsersWithFriendsOperation::new(Arc::clone(&fx.context), Arc::clone(&fx.store));
        select.clone().execute().await;
        let owners = select.owners();
        fx.settings.set_fetched_users(
            owners
                .iter()
                .map(|(record_id, _)| normalized_identity(record_id))
                .collect(),
        );

        let op = prepare_op(&fx, SyncOptions::FETCH_ALL);
        op.set_owners(owners);
        op.clone().execute().await;

        let created = fx
            .store
            .read(|txn| txn.event(fx.event).map(|event| event.created_locally_at))
            .unwrap();
        op.with_pending(|pending| {
            let query = pending.next_query().unwrap();
            assert_eq!(query.filter.created_after, Some(created));
            assert_eq!(pending.local_for(&RecordId::in_default_zone("missing")), None);
        });
    }

    #[tokio::test]
    async fn full_sync_ignores_the_cutoff() {
        let fx = fixture();
        acknowledge_event(&fx);
        let select = UsersWithFriendsOperation::new(Arc::clone(&fx.context), Arc::clone(&fx.store));
        select.clone().execute().await;
        let owners = select.owners();
        fx.settings.set_fetched_users(
            owners
                .iter()
                .map(|(record_id, _)| normalized_identity(record_id))
                .collect(),
        );

        let op = prepare_op(&fx, SyncOptions::FULL_SYNC);
        op.set_owners(owners);
        op.clone().execute().await;

        op.with_pending(|pending| {
            let query = pending.next_query().unwrap();
            assert_eq!(query.filter.created_after, None);
        });
    }

    #[tokio::test]
    async fn known_events_are_mapped_for_the_pipeline() {
        let fx = fixture();
        let select = UsersWithFriendsOperation::new(Arc::clone(&fx.context), Arc::clone(&fx.store));
        select.clone().execute().await;

        let op = prepare_op(&fx, SyncOptions::default());
        op.set_owners(select.owners());
        op.clone().execute().await;

        let record_id = fx
            .store
            .read(|txn| {
                txn.reference(fx.event, Scope::Public)
                    .map(|reference| reference.record_id.clone())
            })
            .unwrap();
        op.with_pending(|pending| {
            assert_eq!(pending.local_for(&record_id), Some(fx.event));
        });
    }

    #[tokio::test]
    async fn no_owners_means_no_query() {
        let fx = fixture();
        let op = prepare_op(&fx, SyncOptions::default());

        op.clone().execute().await;

        assert!(op.meta().outcome().is_none());
        op.with_pending(|pending| assert_eq!(pending.queued_queries(), 0));
        assert!(fx.settings.fetched_users().is_empty(), "nothing persisted");
    }
}
