//! Cross-platform test vectors for the sync engine.
//!
//! The normalized identity form is persisted in settings (subscribed and
//! fetched user sets) and compared when deciding whether a server
//! subscription still covers the desired owners, so every client
//! implementation must produce the same strings. These vectors pin that
//! behavior.

use convene_records::{RecordId, ZoneId};
use serde::{Deserialize, Serialize};

/// A record identity plus its expected normalized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Record name.
    pub record_name: String,
    /// Zone name.
    pub zone_name: String,
    /// Zone owner.
    pub zone_owner: String,
    /// Expected normalized identity.
    pub expected: String,
}

impl IdentityVector {
    /// Builds the record identity this vector describes.
    #[must_use]
    pub fn record_id(&self) -> RecordId {
        RecordId::new(
            self.record_name.clone(),
            ZoneId::new(self.zone_name.clone(), self.zone_owner.clone()),
        )
    }
}

/// One owner identity inside a coverage vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerSpec {
    /// Record name.
    pub record_name: String,
    /// Zone name.
    pub zone_name: String,
    /// Zone owner.
    pub zone_owner: String,
}

impl OwnerSpec {
    fn record_id(&self) -> RecordId {
        RecordId::new(
            self.record_name.clone(),
            ZoneId::new(self.zone_name.clone(), self.zone_owner.clone()),
        )
    }
}

fn owner(record_name: &str, zone_name: &str, zone_owner: &str) -> OwnerSpec {
    OwnerSpec {
        record_name: record_name.into(),
        zone_name: zone_name.into(),
        zone_owner: zone_owner.into(),
    }
}

/// A subscription owner set compared against a desired owner set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Owners already on the subscription.
    pub existing: Vec<OwnerSpec>,
    /// Owners the client wants covered.
    pub desired: Vec<OwnerSpec>,
    /// Whether the subscription counts as covering the desired set.
    pub expected: bool,
}

/// Identity normalization test vectors.
pub fn identity_vectors() -> Vec<IdentityVector> {
    vec![
        IdentityVector {
            id: "identity_default_usual".into(),
            description: "Default zone under the usual owner spelling".into(),
            record_name: "alice".into(),
            zone_name: "_defaultZone".into(),
            zone_owner: "__defaultOwner__".into(),
            expected: "alice:default".into(),
        },
        IdentityVector {
            id: "identity_default_alternate".into(),
            description: "Default zone under the alternate owner spelling".into(),
            record_name: "alice".into(),
            zone_name: "_defaultZone".into(),
            zone_owner: "_defaultOwner".into(),
            expected: "alice:default".into(),
        },
        IdentityVector {
            id: "identity_custom_zone".into(),
            description: "Custom zone keeps the full descriptor".into(),
            record_name: "event-42".into(),
            zone_name: "shared".into(),
            zone_owner: "bob".into(),
            expected: "event-42:shared:bob".into(),
        },
        IdentityVector {
            id: "identity_default_name_foreign_owner".into(),
            description: "Default zone name under a foreign owner is not collapsed".into(),
            record_name: "rec".into(),
            zone_name: "_defaultZone".into(),
            zone_owner: "someone".into(),
            expected: "rec:_defaultZone:someone".into(),
        },
        IdentityVector {
            id: "identity_case_sensitive".into(),
            description: "Record names are case sensitive".into(),
            record_name: "Alice".into(),
            zone_name: "_defaultZone".into(),
            zone_owner: "__defaultOwner__".into(),
            expected: "Alice:default".into(),
        },
        IdentityVector {
            id: "identity_uuid_name".into(),
            description: "UUID-shaped record name passes through unchanged".into(),
            record_name: "f81d4fae-7dec-11d0-a765-00a0c91e6bf6".into(),
            zone_name: "_defaultZone".into(),
            zone_owner: "__defaultOwner__".into(),
            expected: "f81d4fae-7dec-11d0-a765-00a0c91e6bf6:default".into(),
        },
    ]
}

/// Subscription owner-coverage test vectors.
pub fn coverage_vectors() -> Vec<CoverageVector> {
    vec![
        CoverageVector {
            id: "coverage_reordered".into(),
            description: "Same owners in a different order still cover".into(),
            existing: vec![
                owner("alice", "_defaultZone", "__defaultOwner__"),
                owner("bob", "_defaultZone", "__defaultOwner__"),
            ],
            desired: vec![
                owner("bob", "_defaultZone", "__defaultOwner__"),
                owner("alice", "_defaultZone", "__defaultOwner__"),
            ],
            expected: true,
        },
        CoverageVector {
            id: "coverage_spelling_only".into(),
            description: "Owner spellings that normalize identically cover".into(),
            existing: vec![owner("alice", "_defaultZone", "__defaultOwner__")],
            desired: vec![owner("alice", "_defaultZone", "_defaultOwner")],
            expected: true,
        },
        CoverageVector {
            id: "coverage_subset".into(),
            description: "A subscription missing one desired owner does not cover".into(),
            existing: vec![owner("alice", "_defaultZone", "__defaultOwner__")],
            desired: vec![
                owner("alice", "_defaultZone", "__defaultOwner__"),
                owner("carol", "_defaultZone", "__defaultOwner__"),
            ],
            expected: false,
        },
        CoverageVector {
            id: "coverage_superset".into(),
            description: "A subscription with an extra owner does not cover".into(),
            existing: vec![
                owner("alice", "_defaultZone", "__defaultOwner__"),
                owner("carol", "_defaultZone", "__defaultOwner__"),
            ],
            desired: vec![owner("alice", "_defaultZone", "__defaultOwner__")],
            expected: false,
        },
        CoverageVector {
            id: "coverage_duplicates_collapse".into(),
            description: "Duplicate desired owners collapse before comparison".into(),
            existing: vec![owner("alice", "_defaultZone", "__defaultOwner__")],
            desired: vec![
                owner("alice", "_defaultZone", "__defaultOwner__"),
                owner("alice", "_defaultZone", "_defaultOwner"),
            ],
            expected: true,
        },
    ]
}

/// Generate all test vectors as JSON for cross-platform use.
pub fn all_vectors_json() -> String {
    let vectors = AllVectors {
        identity: identity_vectors(),
        coverage: coverage_vectors(),
    };

    serde_json::to_string_pretty(&vectors).expect("serializing vectors")
}

#[derive(Debug, Serialize, Deserialize)]
struct AllVectors {
    identity: Vec<IdentityVector>,
    coverage: Vec<CoverageVector>,
}
