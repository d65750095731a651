//! Sync capabilities of shared-event entities.
//!
//! Shared events exist only in the public scope. Their record fields are
//! immutable creation metadata, so applying a server record never loses
//! local edits; ownership follows the record's creator.

use convene_records::{
    event_fields, identities_match, FieldValue, RemoteRecord, Scope, EVENT_RECORD_TYPE,
};
use convene_store::{EntityKind, LocalId, SharedEvent, StoreTxn};
use tracing::warn;
use uuid::Uuid;

use crate::entity::{MergeContext, SyncableEntityKind};
use crate::error::{SyncError, SyncResult};

/// [`SyncableEntityKind`] implementation for shared-event records.
pub struct EventKind;

const PUBLIC_FIELDS: &[&str] = &[
    event_fields::CREATED_LOCALLY_AT,
    event_fields::CREATED_BY_DEVICE,
    event_fields::UNIQUE_IDENTIFIER,
];

fn reject_private_scope() -> SyncError {
    SyncError::unsupported_workflow("shared events sync only in the public scope")
}

impl SyncableEntityKind for EventKind {
    fn entity_kind(&self) -> EntityKind {
        EntityKind::SharedEvent
    }

    fn record_type(&self) -> &'static str {
        EVENT_RECORD_TYPE
    }

    fn merge_rank(&self) -> u8 {
        // Events resolve their owner against user records, so users merge
        // first.
        1
    }

    fn tracked_fields(&self, scope: Scope) -> &'static [&'static str] {
        match scope {
            Scope::Public => PUBLIC_FIELDS,
            Scope::Private => &[],
        }
    }

    fn update_record(
        &self,
        txn: &StoreTxn,
        entity: LocalId,
        record: &mut RemoteRecord,
        scope: Scope,
    ) -> SyncResult<()> {
        if scope != Scope::Public {
            return Err(reject_private_scope());
        }
        let event = txn.require_event(entity)?;
        record.set(
            event_fields::CREATED_LOCALLY_AT,
            FieldValue::Timestamp(event.created_locally_at),
        );
        record.set(
            event_fields::CREATED_BY_DEVICE,
            FieldValue::Text(event.created_by_device.clone()),
        );
        record.set(
            event_fields::UNIQUE_IDENTIFIER,
            FieldValue::Text(event.unique_identifier.to_string()),
        );
        Ok(())
    }

    fn apply_record(
        &self,
        txn: &mut StoreTxn,
        entity: LocalId,
        record: &RemoteRecord,
        scope: Scope,
        _ctx: &MergeContext,
    ) -> SyncResult<()> {
        if scope != Scope::Public {
            return Err(reject_private_scope());
        }
        let event = txn.require_event_mut(entity)?;
        if let Some(created_at) = record.timestamp(event_fields::CREATED_LOCALLY_AT) {
            event.created_locally_at = created_at;
        }
        if let Some(device) = record.text(event_fields::CREATED_BY_DEVICE) {
            event.created_by_device = device.to_string();
        }
        if let Some(identifier) = record.text(event_fields::UNIQUE_IDENTIFIER) {
            match Uuid::parse_str(identifier) {
                Ok(parsed) => event.unique_identifier = parsed,
                Err(_) => {
                    warn!(
                        record = %record.id,
                        identifier,
                        "event record carries a malformed unique identifier, keeping local one"
                    );
                }
            }
        }
        Ok(())
    }

    fn resolve_missing(
        &self,
        txn: &mut StoreTxn,
        record: &RemoteRecord,
        scope: Scope,
        ctx: &MergeContext,
    ) -> SyncResult<LocalId> {
        if scope != Scope::Public {
            return Err(reject_private_scope());
        }
        if let Some(existing) = txn.entity_for_record(&record.id, Scope::Public) {
            return Ok(existing);
        }
        let creator = record.creator.as_ref().ok_or_else(|| {
            SyncError::internal_inconsistency(format!("event record {} has no creator", record.id))
        })?;
        let owner = txn
            .entity_for_record(creator, Scope::Public)
            .or_else(|| {
                let is_current_user = ctx
                    .current_user_id
                    .as_ref()
                    .map(|current| identities_match(current, creator))
                    .unwrap_or(false);
                if is_current_user {
                    ctx.linked_local_user.filter(|id| txn.contains_entity(*id))
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                SyncError::internal_inconsistency(format!(
                    "no local user for event creator {creator}"
                ))
            })?;
        // Placeholder creation data; apply_record overwrites it from the
        // incoming record right after.
        Ok(txn.add_event(SharedEvent::new(owner, "")))
    }

    fn is_writable(
        &self,
        txn: &StoreTxn,
        entity: LocalId,
        _scope: Scope,
        ctx: &MergeContext,
    ) -> bool {
        txn.event(entity)
            .map(|event| ctx.linked_local_user == Some(event.owner))
            .unwrap_or(false)
    }
}
