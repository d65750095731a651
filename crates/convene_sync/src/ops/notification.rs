//! Turning push notifications into targeted sync work.

use std::sync::Arc;

use async_trait::async_trait;
use convene_records::{
    NotificationReason, RecordId, RemoteNotification, RemoteRecord, Scope,
};
use convene_store::{LocalStore, StoreTxn};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::entity::{delete_record, entity_status, EntityRegistry, MergeContext};
use crate::error::{SyncError, SyncResult};
use crate::pending::PendingChanges;
use crate::task::{TaskMeta, WorkflowTask};

/// Converts one push notification into the smallest possible sync: a
/// record deletion is applied to the store directly, while creations and
/// updates queue a targeted fetch (plus a save when the local copy has
/// unpushed changes) for a downstream pipeline to run.
///
/// Notifications for foreign subscriptions or without a record id finish
/// with an unsupported-workflow error; the payload cannot be acted on.
pub struct RouteNotificationOperation {
    meta: TaskMeta,
    store: Arc<LocalStore>,
    registry: Arc<EntityRegistry>,
    notification: RemoteNotification,
    subscription_id: String,
    pending: Mutex<PendingChanges>,
}

impl RouteNotificationOperation {
    /// Creates the routing operation for `notification`.
    pub fn new(
        context: Arc<WorkflowContext>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        notification: RemoteNotification,
        config: &SyncConfig,
    ) -> Arc<Self> {
        Arc::new(RouteNotificationOperation {
            meta: TaskMeta::new("notification.route", context),
            store,
            registry,
            notification,
            subscription_id: config.subscription_id.clone(),
            pending: Mutex::new(PendingChanges::new()),
        })
    }

    /// The scope the notification applies to.
    pub fn scope(&self) -> Scope {
        self.notification.scope.unwrap_or(Scope::Public)
    }

    /// Runs a closure over the queued fetch/save work under its lock.
    pub fn with_pending<T>(&self, work: impl FnOnce(&mut PendingChanges) -> T) -> T {
        work(&mut self.pending.lock())
    }

    fn validate(&self) -> SyncResult<RecordId> {
        if self.notification.subscription_id != self.subscription_id {
            return Err(SyncError::unsupported_workflow(format!(
                "notification for foreign subscription {}",
                self.notification.subscription_id
            )));
        }
        self.notification
            .record_id
            .clone()
            .ok_or_else(|| SyncError::unsupported_workflow("notification without a record id"))
    }

    fn queue_record_work(&self, txn: &StoreTxn, record_id: &RecordId) -> SyncResult<()> {
        let scope = self.scope();
        let mut pending = self.pending.lock();

        if let Some(reference) = txn.find_by_record(record_id, scope) {
            let entity = reference.entity;
            pending.map_local(reference.record_id.clone(), entity);

            // A deletion still waiting to be pushed wins over the pushed
            // payload; sync it out instead of fetching it back.
            if entity_status(txn, entity)
                .unwrap_or_default()
                .is_marked_for_deletion()
            {
                info!(%record_id, "notified record is locally deleted, pushing the delete");
                pending.add_delete(reference.record_id.clone());
                return Ok(());
            }

            let locally_dirty = !reference.synchronized && reference.change_tag().is_some();
            if locally_dirty {
                let kind = txn
                    .entity_kind(entity)
                    .and_then(|kind| self.registry.kind_of(kind));
                let ctx = MergeContext::from_context(self.meta.context());
                if let Some(kind) = kind {
                    if kind.is_writable(txn, entity, scope, &ctx) {
                        let mut record = reference.cached_record()?.unwrap_or_else(|| {
                            RemoteRecord::new(kind.record_type(), reference.record_id.clone())
                        });
                        kind.update_record(txn, entity, &mut record, scope)?;
                        debug!(%record_id, "pushing dirty local copy alongside the fetch");
                        pending.add_save(record);
                    }
                }
            }
        }

        pending.add_fetch(record_id.clone());
        Ok(())
    }
}

#[async_trait]
impl WorkflowTask for RouteNotificationOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        let record_id = match self.validate() {
            Ok(id) => id,
            Err(error) => {
                self.meta.finish_with_error(error);
                return;
            }
        };
        let result = match self.notification.reason {
            NotificationReason::RecordDeleted => self
                .store
                .with_transaction(|txn| delete_record(txn, &record_id, self.scope())),
            NotificationReason::RecordCreated | NotificationReason::RecordUpdated => self
                .store
                .read(|txn| self.queue_record_work(txn, &record_id)),
        };
        match result {
            Ok(()) => self.meta.finish(),
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}
