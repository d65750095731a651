//! Per-scope record tables and the save conflict matrix.
//!
//! Rows are keyed by normalized identity, so both default-owner spellings
//! of a record id address the same row. Every successful save assigns a
//! fresh change tag; the fail-on-change policy compares tags the way the
//! real service does.

use std::collections::BTreeMap;
use std::time::SystemTime;

use convene_records::{
    normalized_identity, RecordId, RemoteRecord, SavePolicy, ServiceError,
};
use uuid::Uuid;

fn fresh_change_tag() -> String {
    Uuid::new_v4().to_string()
}

fn overlay_fields(mut base: RemoteRecord, incoming: &RemoteRecord) -> RemoteRecord {
    let fields: Vec<String> = incoming.field_names().map(str::to_string).collect();
    for field in fields {
        if let Some(value) = incoming.get(&field).cloned() {
            base.set(field, value);
        }
    }
    base
}

/// Records of one database scope.
#[derive(Default)]
pub(crate) struct RecordTable {
    records: BTreeMap<String, RemoteRecord>,
}

impl RecordTable {
    /// Looks up a record by identity, accepting either owner spelling.
    pub(crate) fn get(&self, id: &RecordId) -> Option<&RemoteRecord> {
        self.records.get(&normalized_identity(id))
    }

    /// Looks up a record by its normalized key.
    pub(crate) fn get_by_key(&self, key: &str) -> Option<&RemoteRecord> {
        self.records.get(key)
    }

    /// Records in normalized-identity order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &RemoteRecord> {
        self.records.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Plants a record directly, assigning server bookkeeping where the
    /// caller left it out. Seeded values are preserved, which lets tests
    /// stage known change tags and creators.
    pub(crate) fn seed(&mut self, mut record: RemoteRecord, now: SystemTime) -> RemoteRecord {
        if record.change_tag.is_none() {
            record.change_tag = Some(fresh_change_tag());
        }
        if record.created_at.is_none() {
            record.created_at = Some(now);
        }
        if record.modified_at.is_none() {
            record.modified_at = Some(now);
        }
        self.records
            .insert(normalized_identity(&record.id), record.clone());
        record
    }

    /// Applies one save under the given policy.
    ///
    /// The fail-on-change matrix:
    /// - no server row, no incoming tag: create
    /// - no server row, incoming tag: the server copy is gone, unknown item
    /// - server row, tags equal: update
    /// - server row, tags differ: record changed, carrying the server copy
    ///
    /// The changed-fields policy overlays the incoming fields on the server
    /// row; all-fields replaces the row wholesale. Neither checks tags.
    pub(crate) fn save(
        &mut self,
        incoming: RemoteRecord,
        policy: SavePolicy,
        creator: Option<&RecordId>,
        now: SystemTime,
    ) -> Result<RemoteRecord, ServiceError> {
        let key = normalized_identity(&incoming.id);
        let mut stored = match self.records.get(&key) {
            Some(server) => {
                if policy == SavePolicy::FailOnChange && server.change_tag != incoming.change_tag {
                    return Err(ServiceError::RecordChanged {
                        server: Box::new(server.clone()),
                    });
                }
                let mut next = match policy {
                    SavePolicy::ChangedFields => overlay_fields(server.clone(), &incoming),
                    _ => incoming,
                };
                next.created_at = server.created_at;
                next.creator = server.creator.clone();
                next
            }
            None => {
                if policy == SavePolicy::FailOnChange && incoming.change_tag.is_some() {
                    return Err(ServiceError::UnknownItem { id: incoming.id });
                }
                let mut next = incoming;
                next.created_at = Some(now);
                next.creator = creator.cloned();
                next
            }
        };
        stored.change_tag = Some(fresh_change_tag());
        stored.modified_at = Some(now);
        self.records.insert(key, stored.clone());
        Ok(stored)
    }

    /// Removes one record.
    pub(crate) fn delete(&mut self, id: &RecordId) -> Result<(), ServiceError> {
        match self.records.remove(&normalized_identity(id)) {
            Some(_) => Ok(()),
            None => Err(ServiceError::UnknownItem { id: id.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_records::{
        FieldValue, ZoneId, DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER, DEFAULT_ZONE_OWNER_ALTERNATE,
    };

    fn record(name: &str) -> RemoteRecord {
        RemoteRecord::new("Test", RecordId::in_default_zone(name))
    }

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn create_assigns_tag_and_bookkeeping() {
        let mut table = RecordTable::default();
        let creator = RecordId::in_default_zone("user-1");

        let stored = table
            .save(record("r1"), SavePolicy::FailOnChange, Some(&creator), now())
            .unwrap();

        assert!(stored.change_tag.is_some());
        assert_eq!(stored.created_at, Some(now()));
        assert_eq!(stored.modified_at, Some(now()));
        assert_eq!(stored.creator, Some(creator));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn update_with_current_tag_rotates_it() {
        let mut table = RecordTable::default();
        let created = table
            .save(record("r1"), SavePolicy::FailOnChange, None, now())
            .unwrap();

        let mut update = record("r1");
        update.change_tag = created.change_tag.clone();
        update.set("title", FieldValue::Text("edited".into()));

        let stored = table
            .save(update, SavePolicy::FailOnChange, None, now())
            .unwrap();
        assert_ne!(stored.change_tag, created.change_tag);
        assert_eq!(stored.text("title"), Some("edited"));
        // Creation bookkeeping survives updates.
        assert_eq!(stored.created_at, created.created_at);
    }

    #[test]
    fn stale_tag_reports_the_server_copy() {
        let mut table = RecordTable::default();
        let created = table
            .save(record("r1"), SavePolicy::FailOnChange, None, now())
            .unwrap();

        let mut stale = record("r1");
        stale.change_tag = Some("stale".into());

        let err = table
            .save(stale, SavePolicy::FailOnChange, None, now())
            .unwrap_err();
        match err {
            ServiceError::RecordChanged { server } => {
                assert_eq!(server.change_tag, created.change_tag);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn untagged_save_of_existing_row_conflicts() {
        let mut table = RecordTable::default();
        table
            .save(record("r1"), SavePolicy::FailOnChange, None, now())
            .unwrap();

        let err = table
            .save(record("r1"), SavePolicy::FailOnChange, None, now())
            .unwrap_err();
        assert!(matches!(err, ServiceError::RecordChanged { .. }));
    }

    #[test]
    fn tagged_save_of_missing_row_is_unknown() {
        let mut table = RecordTable::default();
        let mut orphan = record("gone");
        orphan.change_tag = Some("old-tag".into());

        let err = table
            .save(orphan, SavePolicy::FailOnChange, None, now())
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownItem { .. }));
    }

    #[test]
    fn owner_spellings_address_the_same_row() {
        let mut table = RecordTable::default();
        let usual = RecordId::new("r1", ZoneId::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER));
        let alternate = RecordId::new(
            "r1",
            ZoneId::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER_ALTERNATE),
        );
        table
            .save(
                RemoteRecord::new("Test", usual),
                SavePolicy::FailOnChange,
                None,
                now(),
            )
            .unwrap();

        assert!(table.get(&alternate).is_some());
        assert_eq!(table.len(), 1);
        table.delete(&alternate).unwrap();
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn changed_fields_policy_keeps_unlisted_fields() {
        let mut table = RecordTable::default();
        let mut original = record("r1");
        original.set("title", FieldValue::Text("keep".into()));
        original.set("count", FieldValue::Integer(1));
        table
            .save(original, SavePolicy::FailOnChange, None, now())
            .unwrap();

        let mut sparse = record("r1");
        sparse.set("count", FieldValue::Integer(2));
        let stored = table
            .save(sparse, SavePolicy::ChangedFields, None, now())
            .unwrap();

        assert_eq!(stored.text("title"), Some("keep"));
        assert_eq!(stored.get("count"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn all_fields_policy_replaces_the_row() {
        let mut table = RecordTable::default();
        let mut original = record("r1");
        original.set("title", FieldValue::Text("dropped".into()));
        table
            .save(original, SavePolicy::FailOnChange, None, now())
            .unwrap();

        let mut replacement = record("r1");
        replacement.set("count", FieldValue::Integer(2));
        let stored = table
            .save(replacement, SavePolicy::AllFields, None, now())
            .unwrap();

        assert_eq!(stored.text("title"), None);
        assert_eq!(stored.get("count"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn delete_of_missing_row_is_unknown() {
        let mut table = RecordTable::default();
        let err = table
            .delete(&RecordId::in_default_zone("ghost"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownItem { .. }));
    }

    #[test]
    fn seed_preserves_staged_bookkeeping() {
        let mut table = RecordTable::default();
        let mut staged = record("r1");
        staged.change_tag = Some("known-tag".into());

        let seeded = table.seed(staged, now());
        assert_eq!(seeded.change_tag.as_deref(), Some("known-tag"));
        assert_eq!(seeded.created_at, Some(now()));

        let fresh = table.seed(record("r2"), now());
        assert!(fresh.change_tag.is_some());
    }
}
