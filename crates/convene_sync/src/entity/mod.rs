//! Entity kinds and the record merge semantics shared by all of them.
//!
//! A [`SyncableEntityKind`] describes how one record type maps onto local
//! entities: which fields it tracks per scope, how a server record is
//! applied locally, how a local entity fills an outgoing record, and how a
//! record with no known local entity is resolved. The free functions here
//! implement the semantics every kind shares: reference-counted deletion
//! across scopes, unknown-item recovery and the server-record merge.

mod event;
mod user;

pub use event::EventKind;
pub use user::UserKind;

use std::sync::Arc;

use convene_records::{CloudSyncStatus, FieldValue, RecordId, RemoteRecord, Scope};
use convene_store::{EntityKind, LocalId, StoreTxn, SyncReference};
use tracing::debug;
use uuid::Uuid;

use crate::context::WorkflowContext;
use crate::error::{SyncError, SyncResult};
use crate::pending::PendingChanges;

/// Immutable slice of workflow state the merge hooks need.
#[derive(Debug, Clone, Default)]
pub struct MergeContext {
    /// Record id of the signed-in remote user, when known.
    pub current_user_id: Option<RecordId>,
    /// Local entity linked to the remote user, when resolved.
    pub linked_local_user: Option<LocalId>,
}

impl MergeContext {
    /// Snapshots the relevant fields of a workflow context.
    pub fn from_context(context: &WorkflowContext) -> Self {
        MergeContext {
            current_user_id: context.current_user_id(),
            linked_local_user: context.linked_local_user(),
        }
    }
}

/// Capabilities of one syncable record type.
pub trait SyncableEntityKind: Send + Sync {
    /// The local entity kind this record type maps to.
    fn entity_kind(&self) -> EntityKind;

    /// Remote record type name.
    fn record_type(&self) -> &'static str;

    /// Merge order rank. Lower ranks merge first; users rank before the
    /// entities that reference them.
    fn merge_rank(&self) -> u8;

    /// The record fields this kind owns in the given scope.
    fn tracked_fields(&self, scope: Scope) -> &'static [&'static str];

    /// Copies local entity state into an outgoing record.
    fn update_record(
        &self,
        txn: &StoreTxn,
        entity: LocalId,
        record: &mut RemoteRecord,
        scope: Scope,
    ) -> SyncResult<()>;

    /// Applies a server record onto the local entity.
    fn apply_record(
        &self,
        txn: &mut StoreTxn,
        entity: LocalId,
        record: &RemoteRecord,
        scope: Scope,
        ctx: &MergeContext,
    ) -> SyncResult<()>;

    /// Resolves (or creates) the local entity for a record nobody claims.
    fn resolve_missing(
        &self,
        txn: &mut StoreTxn,
        record: &RemoteRecord,
        scope: Scope,
        ctx: &MergeContext,
    ) -> SyncResult<LocalId>;

    /// Whether this device may push changes of the entity in the scope.
    fn is_writable(
        &self,
        txn: &StoreTxn,
        entity: LocalId,
        scope: Scope,
        ctx: &MergeContext,
    ) -> bool;
}

/// The record types the engine knows how to sync.
pub struct EntityRegistry {
    kinds: Vec<Arc<dyn SyncableEntityKind>>,
}

impl EntityRegistry {
    /// Registry covering users and shared events.
    pub fn standard() -> Self {
        EntityRegistry {
            kinds: vec![Arc::new(UserKind), Arc::new(EventKind)],
        }
    }

    /// The kind handling a record type, if registered.
    pub fn kind_for_record_type(&self, record_type: &str) -> Option<Arc<dyn SyncableEntityKind>> {
        self.kinds
            .iter()
            .find(|kind| kind.record_type() == record_type)
            .map(Arc::clone)
    }

    /// The kind handling a local entity kind.
    pub fn kind_of(&self, entity_kind: EntityKind) -> Option<Arc<dyn SyncableEntityKind>> {
        self.kinds
            .iter()
            .find(|kind| kind.entity_kind() == entity_kind)
            .map(Arc::clone)
    }

    /// Stable-sorts records into merge order: user records strictly before
    /// the records that reference them, unknown types last.
    pub fn sort_for_merge(&self, records: &mut [RemoteRecord]) {
        records.sort_by_key(|record| {
            self.kind_for_record_type(&record.record_type)
                .map(|kind| kind.merge_rank())
                .unwrap_or(u8::MAX)
        });
    }

    /// Union of all kinds' tracked fields for a scope, used as the desired
    /// field list of fetches.
    pub fn desired_fields(&self, scope: Scope) -> Vec<String> {
        let mut fields: Vec<String> = Vec::new();
        for kind in &self.kinds {
            for field in kind.tracked_fields(scope) {
                if !fields.iter().any(|known| known == field) {
                    fields.push((*field).to_string());
                }
            }
        }
        fields
    }
}

/// How a server record was merged.
#[derive(Debug, PartialEq)]
pub enum MergeDisposition {
    /// The server version was applied locally; nothing left to push.
    Applied,
    /// The local version is newer. The returned record carries the
    /// server's system fields with local values and must be saved.
    NeedsPush(RemoteRecord),
    /// The entity is locally marked for deletion; the record was ignored
    /// and its reference left unsynchronized.
    PendingDeletion,
}

/// Returns the entity's record id in `scope`, creating a fresh reference
/// (and record identity) when none exists yet. This is how newly created
/// local entities become visible to the collect stage.
pub fn ensure_reference(txn: &mut StoreTxn, entity: LocalId, scope: Scope) -> SyncResult<RecordId> {
    if let Some(reference) = txn.reference(entity, scope) {
        return Ok(reference.record_id.clone());
    }
    let record_id = RecordId::in_default_zone(Uuid::new_v4().to_string());
    txn.set_reference(SyncReference::new(entity, scope, record_id.clone()))?;
    Ok(record_id)
}

/// Applies a remote deletion of `record_id` in `scope`.
///
/// Drops the scope's reference. The entity itself is removed only when no
/// reference in any other scope still holds it; otherwise it is soft
/// deleted and kept until every scope confirms.
pub fn delete_record(txn: &mut StoreTxn, record_id: &RecordId, scope: Scope) -> SyncResult<()> {
    let Some(entity) = txn.entity_for_record(record_id, scope) else {
        return Ok(());
    };
    txn.remove_reference(entity, scope);
    if txn.has_any_reference(entity) {
        debug!(%record_id, %scope, "soft-deleting entity with remaining references");
        set_status_flag(txn, entity, CloudSyncStatus::MARKED_FOR_DELETION, true);
    } else {
        debug!(%record_id, %scope, "removing entity with its last reference");
        remove_entity(txn, entity);
    }
    Ok(())
}

/// Handles the remote not recognizing `record_id` in `scope`.
///
/// The stale reference is dropped so a later sync can re-create the
/// record. The entity is hard-deleted only when it was already marked for
/// deletion locally and no other scope still references it.
pub fn handle_unknown_item(txn: &mut StoreTxn, record_id: &RecordId, scope: Scope) -> SyncResult<()> {
    let Some(entity) = txn.entity_for_record(record_id, scope) else {
        return Ok(());
    };
    let marked = entity_status(txn, entity)
        .unwrap_or_default()
        .is_marked_for_deletion();
    txn.remove_reference(entity, scope);
    if marked && !txn.has_any_reference(entity) {
        remove_entity(txn, entity);
    }
    Ok(())
}

/// Merges one server record into the local store.
///
/// Resolution order for the local entity: the pipeline's id map, then (for
/// modify results only) a store lookup by record id, then the kind's
/// [`resolve_missing`](SyncableEntityKind::resolve_missing). A local
/// deletion mark always wins over incoming data. Otherwise the server
/// version is applied when it is newer or value-equal on the tracked
/// fields; a newer local version adopts the server's system fields and is
/// reported back for pushing.
pub fn merge_server_record(
    txn: &mut StoreTxn,
    registry: &EntityRegistry,
    pending: &mut PendingChanges,
    record: &RemoteRecord,
    scope: Scope,
    from_modify: bool,
    ctx: &MergeContext,
) -> SyncResult<MergeDisposition> {
    let kind = registry
        .kind_for_record_type(&record.record_type)
        .ok_or_else(|| {
            SyncError::unsupported_workflow(format!(
                "no entity kind handles record type {}",
                record.record_type
            ))
        })?;

    let entity = match pending.local_for(&record.id).filter(|id| txn.contains_entity(*id)) {
        Some(known) => known,
        None => {
            let found = if from_modify {
                txn.entity_for_record(&record.id, scope)
            } else {
                None
            };
            match found {
                Some(existing) => existing,
                None => kind.resolve_missing(txn, record, scope, ctx)?,
            }
        }
    };
    pending.map_local(record.id.clone(), entity);

    if txn.reference(entity, scope).is_none() {
        txn.set_reference(SyncReference::new(entity, scope, record.id.clone()))?;
    }

    let status = entity_status(txn, entity).unwrap_or_default();
    if status.is_marked_for_deletion() {
        if let Some(reference) = txn.reference_mut(entity, scope) {
            reference.synchronized = false;
        }
        return Ok(MergeDisposition::PendingDeletion);
    }

    let cached = match txn.reference(entity, scope) {
        Some(reference) => reference.cached_record()?,
        None => None,
    };
    // A never-synced local copy has no change tag, so the server wins.
    let mut local_copy =
        cached.unwrap_or_else(|| RemoteRecord::new(record.record_type.clone(), record.id.clone()));
    kind.update_record(txn, entity, &mut local_copy, scope)?;

    let fields = kind.tracked_fields(scope);
    if record.values_equal_on(&local_copy, fields) || record.is_newer_than(&local_copy) {
        kind.apply_record(txn, entity, record, scope, ctx)?;
        let reference = txn.reference_mut(entity, scope).ok_or_else(|| {
            SyncError::internal_inconsistency("sync reference vanished during merge")
        })?;
        reference.store_record(record)?;
        reference.synchronized = true;
        Ok(MergeDisposition::Applied)
    } else {
        let mut outgoing = record.clone();
        kind.update_record(txn, entity, &mut outgoing, scope)?;
        let reference = txn.reference_mut(entity, scope).ok_or_else(|| {
            SyncError::internal_inconsistency("sync reference vanished during merge")
        })?;
        // Adopt the server's change tag so the next save wins the
        // conflict check instead of failing on it again.
        reference.store_record(&outgoing)?;
        reference.synchronized = false;
        Ok(MergeDisposition::NeedsPush(outgoing))
    }
}

/// Cloud lifecycle status of an entity of any kind.
pub(crate) fn entity_status(txn: &StoreTxn, entity: LocalId) -> Option<CloudSyncStatus> {
    txn.user(entity)
        .map(|user| user.cloud_status)
        .or_else(|| txn.event(entity).map(|event| event.cloud_status))
}

pub(crate) fn set_status_flag(
    txn: &mut StoreTxn,
    entity: LocalId,
    flag: CloudSyncStatus,
    on: bool,
) {
    let status = if let Some(user) = txn.user_mut(entity) {
        Some(&mut user.cloud_status)
    } else {
        txn.event_mut(entity).map(|event| &mut event.cloud_status)
    };
    if let Some(status) = status {
        if on {
            status.insert(flag);
        } else {
            status.remove(flag);
        }
    }
}

pub(crate) fn remove_entity(txn: &mut StoreTxn, entity: LocalId) {
    if txn.remove_user(entity).is_none() {
        txn.remove_event(entity);
    }
}

pub(crate) fn set_or_clear_text(record: &mut RemoteRecord, field: &str, value: Option<&str>) {
    match value {
        Some(text) => record.set(field, FieldValue::Text(text.to_string())),
        None => {
            record.remove(field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_records::{event_fields, RecordId, EVENT_RECORD_TYPE, USER_RECORD_TYPE};
    use convene_store::{LocalStore, SharedEvent, StoreError, User};
    use std::time::{Duration, SystemTime};

    fn store_with_linked_user() -> (LocalStore, LocalId, MergeContext) {
        let store = LocalStore::new();
        let user_record = RecordId::in_default_zone("current-user");
        let linked = store
            .with_transaction(|txn| {
                let linked = txn.add_user(User::new());
                txn.set_reference(SyncReference::new(
                    linked,
                    Scope::Public,
                    user_record.clone(),
                ))?;
                Ok::<_, StoreError>(linked)
            })
            .unwrap();
        let ctx = MergeContext {
            current_user_id: Some(user_record),
            linked_local_user: Some(linked),
        };
        (store, linked, ctx)
    }

    fn event_record(name: &str, creator: &RecordId) -> RemoteRecord {
        let mut record = RemoteRecord::new(EVENT_RECORD_TYPE, RecordId::in_default_zone(name));
        record.creator = Some(creator.clone());
        record.change_tag = Some(format!("{name}-tag-1"));
        record.modified_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        record.set(
            event_fields::CREATED_LOCALLY_AT,
            FieldValue::Timestamp(SystemTime::UNIX_EPOCH + Duration::from_secs(900)),
        );
        record.set(
            event_fields::CREATED_BY_DEVICE,
            FieldValue::Text("their-phone".into()),
        );
        record.set(
            event_fields::UNIQUE_IDENTIFIER,
            FieldValue::Text(Uuid::new_v4().to_string()),
        );
        record
    }

    #[test]
    fn delete_removes_entity_with_last_reference() {
        let (store, _linked, _ctx) = store_with_linked_user();
        let record_id = RecordId::in_default_zone("event-1");
        let event = store
            .with_transaction(|txn| {
                let owner = txn.users().next().map(|u| u.id).unwrap();
                let event = txn.add_event(SharedEvent::new(owner, "phone"));
                txn.set_reference(SyncReference::new(event, Scope::Public, record_id.clone()))?;
                Ok::<_, StoreError>(event)
            })
            .unwrap();

        store
            .with_transaction(|txn| delete_record(txn, &record_id, Scope::Public))
            .unwrap();

        store.read(|txn| {
            assert!(txn.event(event).is_none());
            assert!(!txn.has_any_reference(event));
        });
    }

    #[test]
    fn delete_soft_deletes_while_other_scope_remains() {
        let (store, linked, _ctx) = store_with_linked_user();
        let private_id = RecordId::in_default_zone("current-user");
        store
            .with_transaction(|txn| {
                txn.set_reference(SyncReference::new(
                    linked,
                    Scope::Private,
                    private_id.clone(),
                ))?;
                Ok::<_, StoreError>(())
            })
            .unwrap();

        store
            .with_transaction(|txn| delete_record(txn, &private_id, Scope::Private))
            .unwrap();

        store.read(|txn| {
            let user = txn.user(linked).unwrap();
            assert!(user.cloud_status.is_marked_for_deletion());
            assert!(txn.reference(linked, Scope::Public).is_some());
            assert!(txn.reference(linked, Scope::Private).is_none());
        });
    }

    #[test]
    fn unknown_item_spares_unmarked_entities() {
        let (store, linked, _ctx) = store_with_linked_user();
        let record_id = RecordId::in_default_zone("current-user");

        store
            .with_transaction(|txn| handle_unknown_item(txn, &record_id, Scope::Public))
            .unwrap();

        store.read(|txn| {
            assert!(txn.user(linked).is_some(), "entity must survive");
            assert!(
                txn.reference(linked, Scope::Public).is_none(),
                "stale reference must go so a later sync re-creates the record"
            );
        });
    }

    #[test]
    fn unknown_item_completes_marked_deletion() {
        let (store, linked, _ctx) = store_with_linked_user();
        let record_id = RecordId::in_default_zone("current-user");
        store
            .with_transaction(|txn| {
                set_status_flag(txn, linked, CloudSyncStatus::MARKED_FOR_DELETION, true);
                Ok::<_, StoreError>(())
            })
            .unwrap();

        store
            .with_transaction(|txn| handle_unknown_item(txn, &record_id, Scope::Public))
            .unwrap();

        store.read(|txn| assert!(txn.user(linked).is_none()));
    }

    #[test]
    fn merge_creates_entity_and_reference_for_new_event() {
        let (store, _linked, ctx) = store_with_linked_user();
        let registry = EntityRegistry::standard();
        let mut pending = PendingChanges::new();
        let record = event_record("event-1", &ctx.current_user_id.clone().unwrap());

        let disposition = store
            .with_transaction(|txn| {
                merge_server_record(txn, &registry, &mut pending, &record, Scope::Public, false, &ctx)
            })
            .unwrap();

        assert_eq!(disposition, MergeDisposition::Applied);
        let entity = pending.local_for(&record.id).expect("id must be mapped");
        store.read(|txn| {
            let event = txn.event(entity).expect("event entity created");
            assert_eq!(event.created_by_device, "their-phone");
            let reference = txn.reference(entity, Scope::Public).expect("reference");
            assert!(reference.synchronized);
            assert_eq!(reference.change_tag(), record.change_tag);
        });
    }

    #[test]
    fn merge_is_idempotent() {
        let (store, _linked, ctx) = store_with_linked_user();
        let registry = EntityRegistry::standard();
        let mut pending = PendingChanges::new();
        let record = event_record("event-1", &ctx.current_user_id.clone().unwrap());

        for round in 0..2 {
            let disposition = store
                .with_transaction(|txn| {
                    merge_server_record(
                        txn,
                        &registry,
                        &mut pending,
                        &record,
                        Scope::Public,
                        false,
                        &ctx,
                    )
                })
                .unwrap();
            assert_eq!(disposition, MergeDisposition::Applied, "round {round}");
        }

        store.read(|txn| {
            assert_eq!(txn.events().count(), 1, "no duplicate entity");
            let entity = pending.local_for(&record.id).unwrap();
            assert!(txn.reference(entity, Scope::Public).unwrap().synchronized);
        });
    }

    #[test]
    fn merge_keeps_local_values_when_client_is_newer() {
        let (store, _linked, ctx) = store_with_linked_user();
        let registry = EntityRegistry::standard();
        let mut pending = PendingChanges::new();

        let mut server_v1 = event_record("event-1", &ctx.current_user_id.clone().unwrap());
        server_v1.modified_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000));
        store
            .with_transaction(|txn| {
                merge_server_record(
                    txn,
                    &registry,
                    &mut pending,
                    &server_v1,
                    Scope::Public,
                    false,
                    &ctx,
                )
            })
            .unwrap();
        let entity = pending.local_for(&server_v1.id).unwrap();

        // Local edit after the cached version.
        store
            .with_transaction(|txn| {
                let event = txn.require_event_mut(entity)?;
                event.created_by_device = "edited-locally".to_string();
                Ok::<_, SyncError>(())
            })
            .unwrap();

        // Server returns the version already cached (same tag, same date):
        // the differing values are the unpushed local edit, so local wins.
        let server_conflict = server_v1.clone();
        let disposition = store
            .with_transaction(|txn| {
                merge_server_record(
                    txn,
                    &registry,
                    &mut pending,
                    &server_conflict,
                    Scope::Public,
                    true,
                    &ctx,
                )
            })
            .unwrap();

        match disposition {
            MergeDisposition::NeedsPush(outgoing) => {
                assert_eq!(
                    outgoing.text(event_fields::CREATED_BY_DEVICE),
                    Some("edited-locally"),
                    "outgoing record must carry local values"
                );
                assert_eq!(outgoing.change_tag, server_conflict.change_tag);
            }
            other => panic!("expected needs-push, got {other:?}"),
        }
        store.read(|txn| {
            let event = txn.event(entity).unwrap();
            assert_eq!(event.created_by_device, "edited-locally");
            assert!(!txn.reference(entity, Scope::Public).unwrap().synchronized);
        });
    }

    #[test]
    fn merge_defers_to_local_deletion_mark() {
        let (store, _linked, ctx) = store_with_linked_user();
        let registry = EntityRegistry::standard();
        let mut pending = PendingChanges::new();
        let record = event_record("event-1", &ctx.current_user_id.clone().unwrap());

        store
            .with_transaction(|txn| {
                merge_server_record(txn, &registry, &mut pending, &record, Scope::Public, false, &ctx)
            })
            .unwrap();
        let entity = pending.local_for(&record.id).unwrap();
        store
            .with_transaction(|txn| {
                set_status_flag(txn, entity, CloudSyncStatus::MARKED_FOR_DELETION, true);
                Ok::<_, StoreError>(())
            })
            .unwrap();

        let disposition = store
            .with_transaction(|txn| {
                merge_server_record(txn, &registry, &mut pending, &record, Scope::Public, false, &ctx)
            })
            .unwrap();

        assert_eq!(disposition, MergeDisposition::PendingDeletion);
        store.read(|txn| {
            assert!(
                !txn.reference(entity, Scope::Public).unwrap().synchronized,
                "ignored data leaves the reference unsynchronized"
            );
        });
    }

    #[test]
    fn sort_for_merge_puts_user_records_first() {
        let registry = EntityRegistry::standard();
        let creator = RecordId::in_default_zone("u");
        let mut records = vec![
            event_record("e1", &creator),
            RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u1")),
            event_record("e2", &creator),
            RemoteRecord::new(USER_RECORD_TYPE, RecordId::in_default_zone("u2")),
        ];

        registry.sort_for_merge(&mut records);

        let types: Vec<&str> = records.iter().map(|r| r.record_type.as_str()).collect();
        assert_eq!(
            types,
            vec![USER_RECORD_TYPE, USER_RECORD_TYPE, EVENT_RECORD_TYPE, EVENT_RECORD_TYPE]
        );
        // Stable sort keeps same-rank order.
        assert_eq!(records[2].id.name, "e1");
    }

    #[test]
    fn ensure_reference_is_idempotent() {
        let (store, linked, _ctx) = store_with_linked_user();
        let (first, second) = store
            .with_transaction(|txn| {
                let first = ensure_reference(txn, linked, Scope::Private)?;
                let second = ensure_reference(txn, linked, Scope::Private)?;
                Ok::<_, SyncError>((first, second))
            })
            .unwrap();
        assert_eq!(first, second);
    }
}
