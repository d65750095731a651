//! Scoped record identities and the normalized representation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the implicit default zone.
pub const DEFAULT_ZONE_NAME: &str = "_defaultZone";

/// Owner name the remote service usually reports for the default zone.
pub const DEFAULT_ZONE_OWNER: &str = "__defaultOwner__";

/// Alternate owner spelling the remote service sometimes reports for the
/// default zone. Identities differing only in this spelling must compare
/// equal, which is why lookups go through [`normalized_identity`].
pub const DEFAULT_ZONE_OWNER_ALTERNATE: &str = "_defaultOwner";

/// A record zone: a named partition of one account's database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId {
    /// Zone name.
    pub name: String,
    /// Owner account name.
    pub owner: String,
}

impl ZoneId {
    /// Creates a zone identifier.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }

    /// The default zone with the usual owner spelling.
    pub fn default_zone() -> Self {
        Self::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER)
    }

    /// Whether this is the default zone, accepting both documented owner
    /// spellings.
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_ZONE_NAME
            && (self.owner == DEFAULT_ZONE_OWNER || self.owner == DEFAULT_ZONE_OWNER_ALTERNATE)
    }
}

/// Identity of one remote record: a name plus its zone.
///
/// The derived `Eq`/`Hash` compare the raw zone descriptor, which is not
/// byte-stable for the default zone (see [`DEFAULT_ZONE_OWNER_ALTERNATE`]).
/// Map and set lookups keyed by `RecordId` must therefore either key on
/// [`normalized_identity`] or fall back to a linear scan comparing with
/// [`identities_match`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Record name, unique within its zone.
    pub name: String,
    /// Zone the record lives in.
    pub zone: ZoneId,
}

impl RecordId {
    /// Creates a record identity in the given zone.
    pub fn new(name: impl Into<String>, zone: ZoneId) -> Self {
        Self {
            name: name.into(),
            zone,
        }
    }

    /// Creates a record identity in the default zone.
    pub fn in_default_zone(name: impl Into<String>) -> Self {
        Self::new(name, ZoneId::default_zone())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&normalized_identity(self))
    }
}

/// The normalized ("indexable") representation of a record identity.
///
/// Default-zone identities collapse to `"<name>:default"` regardless of the
/// owner spelling; all other identities include zone name and owner verbatim.
pub fn normalized_identity(id: &RecordId) -> String {
    if id.zone.is_default() {
        format!("{}:default", id.name)
    } else {
        format!("{}:{}:{}", id.name, id.zone.name, id.zone.owner)
    }
}

/// Whether two record identities are the same record after normalization.
pub fn identities_match(a: &RecordId, b: &RecordId) -> bool {
    normalized_identity(a) == normalized_identity(b)
}
