//! Sync references: the join between local entities and remote records.

use bytes::Bytes;
use convene_records::{RecordId, RecordResult, RemoteRecord, Scope, SystemFields};

use crate::entity::LocalId;

/// Links one local entity to one remote record identity within one scope.
///
/// The store guarantees at most one reference per (entity, scope) pair.
/// The system-fields blob holds the opaque server metadata needed to update
/// the record in place; it is absent until the record has been seen on the
/// server.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReference {
    /// The local entity this reference belongs to.
    pub entity: LocalId,
    /// Scope of the remote record.
    pub scope: Scope,
    /// Identity of the remote record.
    pub record_id: RecordId,
    /// Serialized system fields of the last known server version.
    pub system_fields: Option<Bytes>,
    /// Whether local and remote state agreed at the last sync.
    pub synchronized: bool,
}

impl SyncReference {
    /// Creates an unsynchronized reference with no server metadata yet.
    pub fn new(entity: LocalId, scope: Scope, record_id: RecordId) -> Self {
        Self {
            entity,
            scope,
            record_id,
            system_fields: None,
            synchronized: false,
        }
    }

    /// Stores the server metadata of a record on this reference.
    pub fn store_record(&mut self, record: &RemoteRecord) -> RecordResult<()> {
        self.record_id = record.id.clone();
        self.system_fields = Some(record.system_fields().encode()?);
        Ok(())
    }

    /// Rebuilds the locally cached record skeleton from the stored system
    /// fields. `None` when the record has never been seen on the server.
    pub fn cached_record(&self) -> RecordResult<Option<RemoteRecord>> {
        match &self.system_fields {
            None => Ok(None),
            Some(blob) => Ok(Some(RemoteRecord::from_system_fields(SystemFields::decode(
                blob,
            )?))),
        }
    }

    /// Change tag of the last known server version. Absent metadata or a
    /// blob that fails to decode both read as no tag.
    pub fn change_tag(&self) -> Option<String> {
        let blob = self.system_fields.as_ref()?;
        SystemFields::decode(blob).ok()?.change_tag
    }
}
