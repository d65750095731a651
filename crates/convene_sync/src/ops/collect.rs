//! Collecting local changes into pending remote work.

use std::sync::Arc;

use async_trait::async_trait;
use convene_records::{RemoteRecord, Scope, SyncOptions};
use convene_store::{EntityKind, LocalId, LocalStore, StoreTxn, SyncReference};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::WorkflowContext;
use crate::entity::{entity_status, EntityRegistry, MergeContext};
use crate::error::SyncResult;
use crate::pending::PendingChanges;
use crate::task::{TaskMeta, WorkflowTask};

/// Scans one scope's sync references and turns every unsynchronized one
/// into pending fetches, saves and deletes.
///
/// By default only references flagged out of sync are collected;
/// [`SyncOptions::REFRESH_ALL`] collects every reference, and an explicit
/// target list restricts the scan to those entities while ignoring their
/// synchronized flags.
pub struct CollectChangesOperation {
    meta: TaskMeta,
    store: Arc<LocalStore>,
    scope: Scope,
    options: SyncOptions,
    registry: Arc<EntityRegistry>,
    pending: Mutex<PendingChanges>,
    explicit: Mutex<Vec<LocalId>>,
    kinds: Mutex<Vec<EntityKind>>,
}

impl CollectChangesOperation {
    /// Creates a collect operation for `scope`.
    pub fn new(
        scope: Scope,
        context: Arc<WorkflowContext>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        options: SyncOptions,
    ) -> Arc<Self> {
        let name = match scope {
            Scope::Private => "collect.private",
            Scope::Public => "collect.public",
        };
        Arc::new(CollectChangesOperation {
            meta: TaskMeta::new(name, context),
            store,
            scope,
            options,
            registry,
            pending: Mutex::new(PendingChanges::new()),
            explicit: Mutex::new(Vec::new()),
            kinds: Mutex::new(Vec::new()),
        })
    }

    /// Restricts the scan to the given entities, synchronized or not.
    pub fn set_explicit_targets(&self, targets: Vec<LocalId>) {
        *self.explicit.lock() = targets;
    }

    /// Restricts the scan to entities of the given kinds. An empty list
    /// (the default) collects every kind.
    pub fn set_kinds(&self, kinds: Vec<EntityKind>) {
        *self.kinds.lock() = kinds;
    }

    /// Runs a closure over the collected changes under their lock.
    pub fn with_pending<T>(&self, work: impl FnOnce(&mut PendingChanges) -> T) -> T {
        work(&mut self.pending.lock())
    }

    fn collect(&self, txn: &StoreTxn) -> SyncResult<()> {
        let ctx = MergeContext::from_context(self.meta.context());
        let mut pending = self.pending.lock();
        let explicit = self.explicit.lock().clone();
        let kinds = self.kinds.lock().clone();

        if explicit.is_empty() {
            let refresh = self.options.contains(SyncOptions::REFRESH_ALL);
            for reference in txn.references_in_scope(self.scope) {
                if reference.synchronized && !refresh {
                    continue;
                }
                if !kind_allowed(txn, reference.entity, &kinds) {
                    continue;
                }
                self.collect_reference(txn, &mut pending, reference, &ctx)?;
            }
        } else {
            for entity in explicit {
                if let Some(reference) = txn.reference(entity, self.scope) {
                    self.collect_reference(txn, &mut pending, reference, &ctx)?;
                }
            }
        }

        debug!(
            scope = %self.scope,
            fetches = pending.fetch_count(),
            saves = pending.save_count(),
            deletes = pending.delete_count(),
            "collected local changes"
        );
        Ok(())
    }

    fn collect_reference(
        &self,
        txn: &StoreTxn,
        pending: &mut PendingChanges,
        reference: &SyncReference,
        ctx: &MergeContext,
    ) -> SyncResult<()> {
        let entity = reference.entity;
        pending.map_local(reference.record_id.clone(), entity);

        if entity_status(txn, entity)
            .unwrap_or_default()
            .is_marked_for_deletion()
        {
            pending.add_delete(reference.record_id.clone());
            return Ok(());
        }

        let Some(kind) = txn
            .entity_kind(entity)
            .and_then(|kind| self.registry.kind_of(kind))
        else {
            warn!(%entity, "reference to an entity no kind handles, skipping");
            return Ok(());
        };

        // User records are fetched even before their first sync so profile
        // and friend changes from other devices come in; everything else is
        // only fetched once the server has seen it.
        if reference.change_tag().is_some() || kind.entity_kind() == EntityKind::User {
            pending.add_fetch(reference.record_id.clone());
        }

        if kind.is_writable(txn, entity, self.scope, ctx) {
            let mut record = reference.cached_record()?.unwrap_or_else(|| {
                RemoteRecord::new(kind.record_type(), reference.record_id.clone())
            });
            kind.update_record(txn, entity, &mut record, self.scope)?;
            pending.add_save(record);
        }
        Ok(())
    }
}

fn kind_allowed(txn: &StoreTxn, entity: LocalId, kinds: &[EntityKind]) -> bool {
    kinds.is_empty()
        || txn
            .entity_kind(entity)
            .map(|kind| kinds.contains(&kind))
            .unwrap_or(false)
}

#[async_trait]
impl WorkflowTask for CollectChangesOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.store.read(|txn| self.collect(txn)) {
            Ok(()) => self.meta.finish(),
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ensure_reference;
    use crate::error::SyncError;
    use convene_records::CloudSyncStatus;
    use convene_store::{SharedEvent, User};

    struct Fixture {
        store: Arc<LocalStore>,
        context: Arc<WorkflowContext>,
        linked: LocalId,
        event: LocalId,
    }

    /// Linked user plus one event they own, both referenced in the public
    /// scope and unsynchronized.
    fn fixture() -> Fixture {
        let store = Arc::new(LocalStore::new());
        let context = Arc::new(WorkflowContext::new());
        let (linked, event) = store
            .with_transaction(|txn| {
                let linked = txn.add_user(User::new());
                let event = txn.add_event(SharedEvent::new(linked, "test-device"));
                ensure_reference(txn, linked, Scope::Public)?;
                ensure_reference(txn, event, Scope::Public)?;
                Ok::<_, SyncError>((linked, event))
            })
            .unwrap();
        context.set_linked_local_user(linked);
        Fixture {
            store,
            context,
            linked,
            event,
        }
    }

    fn collect_op(fx: &Fixture, options: SyncOptions) -> Arc<CollectChangesOperation> {
        CollectChangesOperation::new(
            Scope::Public,
            Arc::clone(&fx.context),
            Arc::clone(&fx.store),
            Arc::new(EntityRegistry::standard()),
            options,
        )
    }

    #[tokio::test]
    async fn collects_saves_for_writable_entities() {
        let fx = fixture();
        let op = collect_op(&fx, SyncOptions::default());

        op.clone().execute().await;

        assert!(op.meta().outcome().is_none());
        op.with_pending(|pending| {
            assert_eq!(pending.save_count(), 2, "own user record and own event");
            assert_eq!(
                pending.fetch_count(),
                1,
                "the user record is fetched, the never-synced event is not"
            );
            assert_eq!(pending.delete_count(), 0);
        });
    }

    #[tokio::test]
    async fn synchronized_references_are_skipped_unless_refreshing() {
        let fx = fixture();
        fx.store
            .with_transaction(|txn| {
                for entity in [fx.linked, fx.event] {
                    if let Some(reference) = txn.reference_mut(entity, Scope::Public) {
                        reference.synchronized = true;
                    }
                }
                Ok::<_, SyncError>(())
            })
            .unwrap();

        let op = collect_op(&fx, SyncOptions::default());
        op.clone().execute().await;
        op.with_pending(|pending| assert!(!pending.has_work()));

        let refresh = collect_op(&fx, SyncOptions::REFRESH_ALL);
        refresh.clone().execute().await;
        refresh.with_pending(|pending| assert_eq!(pending.save_count(), 2));
    }

    #[tokio::test]
    async fn marked_entities_become_deletes() {
        let fx = fixture();
        fx.store
            .with_transaction(|txn| {
                let event = txn.require_event_mut(fx.event)?;
                event.cloud_status.insert(CloudSyncStatus::MARKED_FOR_DELETION);
                Ok::<_, SyncError>(())
            })
            .unwrap();

        let op = collect_op(&fx, SyncOptions::default());
        op.clone().execute().await;

        op.with_pending(|pending| {
            assert_eq!(pending.delete_count(), 1);
            assert_eq!(pending.save_count(), 1, "only the user record is saved");
        });
    }

    #[tokio::test]
    async fn explicit_targets_ignore_the_synchronized_flag() {
        let fx = fixture();
        fx.store
            .with_transaction(|txn| {
                if let Some(reference) = txn.reference_mut(fx.linked, Scope::Public) {
                    reference.synchronized = true;
                }
                Ok::<_, SyncError>(())
            })
            .unwrap();

        let op = collect_op(&fx, SyncOptions::default());
        op.set_explicit_targets(vec![fx.linked]);
        op.clone().execute().await;

        op.with_pending(|pending| {
            assert_eq!(pending.save_count(), 1, "explicit target collected anyway");
            assert_eq!(
                pending.local_for(&convene_records::RecordId::in_default_zone("unknown")),
                None
            );
        });
    }

    #[tokio::test]
    async fn kind_filter_limits_the_scan() {
        let fx = fixture();
        let op = collect_op(&fx, SyncOptions::default());
        op.set_kinds(vec![EntityKind::User]);

        op.clone().execute().await;

        op.with_pending(|pending| {
            assert_eq!(pending.save_count(), 1, "only the user record");
            assert_eq!(pending.local_for(&fx.store.read(|txn| {
                txn.reference(fx.event, Scope::Public).unwrap().record_id.clone()
            })), None, "filtered references are not even mapped");
        });
    }

    #[tokio::test]
    async fn foreign_entities_are_fetch_only() {
        let fx = fixture();
        // A friend's user entity: present locally, not writable by us.
        fx.store
            .with_transaction(|txn| {
                let friend = txn.add_user(User::new());
                ensure_reference(txn, friend, Scope::Public)?;
                Ok::<_, SyncError>(())
            })
            .unwrap();

        let op = collect_op(&fx, SyncOptions::default());
        op.clone().execute().await;

        op.with_pending(|pending| {
            assert_eq!(pending.fetch_count(), 2, "both user records");
            assert_eq!(pending.save_count(), 2, "own user and own event only");
        });
    }
}
