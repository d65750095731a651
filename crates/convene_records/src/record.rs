//! Remote records and field values.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use crate::identity::RecordId;
use crate::system_fields::SystemFields;

/// Database scope of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Per-account database, visible only to its owner.
    Private,
    /// Shared database, visible to every account.
    Public,
}

impl Scope {
    /// Both scopes, in sync order (private first).
    pub const ALL: [Scope; 2] = [Scope::Private, Scope::Public];

    /// Stable string form, used in settings and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Private => "private",
            Scope::Public => "public",
        }
    }

    /// Parses the stable string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "private" => Some(Scope::Private),
            "public" => Some(Scope::Public),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value on a remote record.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed integer.
    Integer(i64),
    /// Point in time.
    Timestamp(SystemTime),
    /// Reference to another record.
    Reference(RecordId),
    /// Ordered list of record references.
    ReferenceList(Vec<RecordId>),
}

impl FieldValue {
    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Timestamp content, if this is a timestamp value.
    pub fn as_timestamp(&self) -> Option<SystemTime> {
        match self {
            FieldValue::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// Referenced record identity, if this is a reference value.
    pub fn as_reference(&self) -> Option<&RecordId> {
        match self {
            FieldValue::Reference(id) => Some(id),
            _ => None,
        }
    }

    /// Referenced record identities, if this is a reference list.
    pub fn as_reference_list(&self) -> Option<&[RecordId]> {
        match self {
            FieldValue::ReferenceList(ids) => Some(ids),
            _ => None,
        }
    }
}

/// A versioned key-value record in the remote store.
///
/// The change tag implements optimistic concurrency: it is assigned by the
/// remote service on every successful save and compared by save policies
/// that fail on concurrent modification.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    /// Schema type of the record.
    pub record_type: String,
    /// Scoped identity.
    pub id: RecordId,
    /// Change tag from the last known server version, `None` for records
    /// that were never saved.
    pub change_tag: Option<String>,
    /// Server-side creation time.
    pub created_at: Option<SystemTime>,
    /// Server-side last modification time.
    pub modified_at: Option<SystemTime>,
    /// Identity of the user record that created this record.
    pub creator: Option<RecordId>,
    values: BTreeMap<String, FieldValue>,
}

impl RemoteRecord {
    /// Creates a fresh record that has never been saved remotely.
    pub fn new(record_type: impl Into<String>, id: RecordId) -> Self {
        Self {
            record_type: record_type.into(),
            id,
            change_tag: None,
            created_at: None,
            modified_at: None,
            creator: None,
            values: BTreeMap::new(),
        }
    }

    /// Rebuilds a record skeleton from decoded system fields. User fields
    /// start empty and are filled in by the owning entity.
    pub fn from_system_fields(fields: SystemFields) -> Self {
        Self {
            record_type: fields.record_type,
            id: fields.id,
            change_tag: fields.change_tag,
            created_at: fields.created_at,
            modified_at: fields.modified_at,
            creator: fields.creator,
            values: BTreeMap::new(),
        }
    }

    /// Extracts the system fields of this record.
    pub fn system_fields(&self) -> SystemFields {
        SystemFields {
            id: self.id.clone(),
            record_type: self.record_type.clone(),
            change_tag: self.change_tag.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            creator: self.creator.clone(),
        }
    }

    /// Value of a field.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    /// Removes a field value.
    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    /// Text content of a field.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    /// Timestamp content of a field.
    pub fn timestamp(&self, field: &str) -> Option<SystemTime> {
        self.get(field).and_then(FieldValue::as_timestamp)
    }

    /// Reference content of a field.
    pub fn reference(&self, field: &str) -> Option<&RecordId> {
        self.get(field).and_then(FieldValue::as_reference)
    }

    /// Reference-list content of a field.
    pub fn reference_list(&self, field: &str) -> Option<&[RecordId]> {
        self.get(field).and_then(FieldValue::as_reference_list)
    }

    /// Names of all populated fields.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Whether two records agree on the given fields. Fields missing from
    /// both sides count as equal.
    pub fn values_equal_on(&self, other: &RemoteRecord, fields: &[&str]) -> bool {
        fields
            .iter()
            .all(|field| self.values.get(*field) == other.values.get(*field))
    }

    /// Whether this server-side record is newer than a locally cached copy.
    ///
    /// A missing client modification date always yields true; otherwise an
    /// explicitly newer server date wins, and differing change tags break
    /// the tie.
    pub fn is_newer_than(&self, client: &RemoteRecord) -> bool {
        let Some(client_modified) = client.modified_at else {
            return true;
        };
        if let Some(server_modified) = self.modified_at {
            if server_modified > client_modified {
                return true;
            }
        }
        self.change_tag != client.change_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(name: &str) -> RemoteRecord {
        RemoteRecord::new("Test", RecordId::in_default_zone(name))
    }

    #[test]
    fn field_accessors_round_trip() {
        let mut rec = record("r1");
        rec.set("title", FieldValue::Text("hello".into()));
        rec.set(
            "owner",
            FieldValue::Reference(RecordId::in_default_zone("u1")),
        );

        assert_eq!(rec.text("title"), Some("hello"));
        assert_eq!(
            rec.reference("owner"),
            Some(&RecordId::in_default_zone("u1"))
        );
        assert_eq!(rec.text("missing"), None);
        assert_eq!(rec.field_names().count(), 2);
    }

    #[test]
    fn values_equal_ignores_unlisted_fields() {
        let mut a = record("r1");
        let mut b = record("r1");
        a.set("title", FieldValue::Text("same".into()));
        b.set("title", FieldValue::Text("same".into()));
        b.set("extra", FieldValue::Integer(7));

        assert!(a.values_equal_on(&b, &["title"]));
        assert!(!a.values_equal_on(&b, &["title", "extra"]));
        assert!(a.values_equal_on(&b, &["absent"]));
    }

    #[test]
    fn missing_client_date_means_server_is_newer() {
        let server = record("r1");
        let client = record("r1");
        assert!(server.is_newer_than(&client));
    }

    #[test]
    fn newer_server_date_wins() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let mut server = record("r1");
        let mut client = record("r1");
        client.modified_at = Some(base);
        server.modified_at = Some(base + Duration::from_secs(5));
        server.change_tag = Some("t1".into());
        client.change_tag = Some("t1".into());

        assert!(server.is_newer_than(&client));
    }

    #[test]
    fn equal_dates_fall_back_to_change_tags() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let mut server = record("r1");
        let mut client = record("r1");
        client.modified_at = Some(base);
        server.modified_at = Some(base);
        server.change_tag = Some("t2".into());
        client.change_tag = Some("t1".into());
        assert!(server.is_newer_than(&client));

        client.change_tag = Some("t2".into());
        assert!(!server.is_newer_than(&client));
    }

    #[test]
    fn system_fields_round_trip_rebuilds_skeleton() {
        let mut rec = record("r1");
        rec.change_tag = Some("tag".into());
        rec.creator = Some(RecordId::in_default_zone("creator"));
        rec.set("title", FieldValue::Text("dropped".into()));

        let rebuilt = RemoteRecord::from_system_fields(rec.system_fields());
        assert_eq!(rebuilt.id, rec.id);
        assert_eq!(rebuilt.change_tag, rec.change_tag);
        assert_eq!(rebuilt.creator, rec.creator);
        assert_eq!(rebuilt.get("title"), None);
    }

    #[test]
    fn scope_string_round_trip() {
        for scope in Scope::ALL {
            assert_eq!(Scope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(Scope::parse("other"), None);
    }
}
