//! Property-based generators for identities, records and options.
//!
//! The identity strategies are deliberately biased toward the default
//! zone and emit both documented owner spellings, so any property written
//! over them exercises the normalization equivalence.

use std::time::{Duration, SystemTime};

use convene_records::{
    FieldValue, RecordId, RemoteRecord, SyncOptions, ZoneId, DEFAULT_ZONE_NAME,
    DEFAULT_ZONE_OWNER, DEFAULT_ZONE_OWNER_ALTERNATE,
};
use proptest::prelude::*;

/// Strategy for record names.
pub fn record_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9][A-Za-z0-9-]{0,30}").expect("valid regex")
}

/// Strategy for zones: the default zone under either owner spelling, with
/// the occasional custom zone.
pub fn zone_strategy() -> impl Strategy<Value = ZoneId> {
    prop_oneof![
        3 => Just(ZoneId::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER)),
        3 => Just(ZoneId::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER_ALTERNATE)),
        1 => (record_name_strategy(), record_name_strategy())
            .prop_map(|(name, owner)| ZoneId::new(name, owner)),
    ]
}

/// Strategy for record identities.
pub fn record_id_strategy() -> impl Strategy<Value = RecordId> {
    (record_name_strategy(), zone_strategy()).prop_map(|(name, zone)| RecordId::new(name, zone))
}

/// Strategy producing one default-zone identity under both owner
/// spellings.
pub fn spelled_pair_strategy() -> impl Strategy<Value = (RecordId, RecordId)> {
    record_name_strategy().prop_map(|name| {
        (
            RecordId::new(
                name.clone(),
                ZoneId::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER),
            ),
            RecordId::new(name, ZoneId::new(DEFAULT_ZONE_NAME, DEFAULT_ZONE_OWNER_ALTERNATE)),
        )
    })
}

/// Strategy for field values.
pub fn field_value_strategy() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        any::<i64>().prop_map(FieldValue::Integer),
        "[a-z ]{0,20}".prop_map(FieldValue::Text),
        (0u64..4_000_000_000).prop_map(|secs| {
            FieldValue::Timestamp(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        }),
        record_id_strategy().prop_map(FieldValue::Reference),
    ]
}

/// Strategy for remote records of one type, with an optional change tag
/// and a handful of user fields.
pub fn remote_record_strategy(record_type: &'static str) -> impl Strategy<Value = RemoteRecord> {
    (
        record_id_strategy(),
        prop::option::of("[a-f0-9]{8}"),
        prop::collection::btree_map("[a-z]{1,12}", field_value_strategy(), 0..4),
    )
        .prop_map(move |(id, tag, fields)| {
            let mut record = RemoteRecord::new(record_type, id);
            record.change_tag = tag;
            for (name, value) in fields {
                record.set(name, value);
            }
            record
        })
}

/// Strategy covering every sync-option combination.
pub fn sync_options_strategy() -> impl Strategy<Value = SyncOptions> {
    (0u8..4).prop_map(SyncOptions::from_bits_truncate)
}

/// Configuration presets for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Preset for quick in-module tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Preset for thorough runs.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to a proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convene_records::{identities_match, normalized_identity};

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn owner_spellings_normalize_identically((usual, alternate) in spelled_pair_strategy()) {
            prop_assert!(identities_match(&usual, &alternate));
            prop_assert_eq!(normalized_identity(&usual), normalized_identity(&alternate));
            prop_assert!(normalized_identity(&usual).ends_with(":default"));
        }

        #[test]
        fn normalization_is_injective_per_zone(id in record_id_strategy(), other in record_id_strategy()) {
            // Two identities with equal normalized forms are the same record.
            if normalized_identity(&id) == normalized_identity(&other) {
                prop_assert!(identities_match(&id, &other));
            }
        }

        #[test]
        fn generated_records_carry_their_type(record in remote_record_strategy("Test")) {
            prop_assert_eq!(record.record_type.as_str(), "Test");
        }

        #[test]
        fn option_labels_are_total(options in sync_options_strategy()) {
            let label = options.label();
            prop_assert!(["full", "fetch-all", "refresh-all", "incremental"].contains(&label));
        }
    }
}
