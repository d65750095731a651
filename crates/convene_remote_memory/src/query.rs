//! Query evaluation and page continuation.
//!
//! A query snapshots the normalized ids of its matches when it starts;
//! continuation pages walk the snapshot and read rows live, so records
//! deleted between pages simply drop out.

use convene_records::{
    event_fields, identities_match, normalized_identity, QueryFilter, RecordQuery, RemoteRecord,
    Scope,
};

use crate::tables::RecordTable;

/// Continuation state of one paginated query.
pub(crate) struct OpenCursor {
    /// Scope the query ran in; a cursor presented against another scope
    /// is rejected.
    pub(crate) scope: Scope,
    /// Normalized ids not yet returned, in match order.
    pub(crate) remaining: Vec<String>,
    /// Field restriction carried over from the originating query.
    pub(crate) desired_fields: Option<Vec<String>>,
}

/// Whether a record satisfies every clause of a filter. Empty clauses
/// match everything.
pub(crate) fn record_matches(record: &RemoteRecord, filter: &QueryFilter) -> bool {
    if let Some(owners) = &filter.owned_by {
        let Some(creator) = &record.creator else {
            return false;
        };
        if !owners.iter().any(|owner| identities_match(owner, creator)) {
            return false;
        }
    }
    if let Some(cutoff) = filter.created_after {
        // The cutoff clause filters on the local-creation field, not the
        // server timestamps. Records without the field never match it.
        let Some(created) = record.timestamp(event_fields::CREATED_LOCALLY_AT) else {
            return false;
        };
        if created <= cutoff {
            return false;
        }
    }
    true
}

/// Normalized ids of the records matching a query, in table order.
pub(crate) fn matching_ids(table: &RecordTable, query: &RecordQuery) -> Vec<String> {
    table
        .iter()
        .filter(|record| record.record_type == query.record_type)
        .filter(|record| record_matches(record, &query.filter))
        .map(|record| normalized_identity(&record.id))
        .collect()
}

/// Copies a record, keeping only the desired user fields. System fields
/// always come along. `None` keeps everything.
pub(crate) fn restrict_fields(record: &RemoteRecord, desired: Option<&[String]>) -> RemoteRecord {
    let Some(desired) = desired else {
        return record.clone();
    };
    let mut out = RemoteRecord::from_system_fields(record.system_fields());
    for field in desired {
        if let Some(value) = record.get(field).cloned() {
            out.set(field.clone(), value);
        }
    }
    out
}
