//! Request and response types of the remote record service.
//!
//! Outcome structs deliberately mirror the remote completion-handler shape:
//! partial results can accompany an error, so the error is a field rather
//! than an `Err` branch. The pipeline's result processing consumes both.

use std::collections::BTreeSet;
use std::fmt;
use std::time::SystemTime;

use uuid::Uuid;

use crate::error::ServiceError;
use crate::identity::{normalized_identity, RecordId};
use crate::record::{RemoteRecord, Scope};

/// Account availability reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Not queried yet.
    Unknown,
    /// Account present and writable.
    Available,
    /// No account is signed in.
    NoAccount,
    /// The account exists but may not be used.
    Restricted,
    /// The service could not determine the account state.
    CouldNotDetermine,
}

impl AccountStatus {
    /// Whether sync work may proceed.
    pub fn is_available(&self) -> bool {
        matches!(self, AccountStatus::Available)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AccountStatus::Unknown => "unknown",
            AccountStatus::Available => "available",
            AccountStatus::NoAccount => "no account",
            AccountStatus::Restricted => "restricted",
            AccountStatus::CouldNotDetermine => "could not determine",
        };
        f.write_str(label)
    }
}

/// User-discoverability permission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Never requested.
    InitialState,
    /// Granted by the user.
    Granted,
    /// Denied by the user.
    Denied,
    /// The request could not complete.
    CouldNotComplete,
}

/// Filter clauses of a record query. Empty clauses match everything.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryFilter {
    /// Restrict to records created by any of these user record identities.
    pub owned_by: Option<Vec<RecordId>>,
    /// Restrict to records whose local creation field is after this time.
    pub created_after: Option<SystemTime>,
}

/// A query over one record type in one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    /// Record type to match.
    pub record_type: String,
    /// Filter clauses.
    pub filter: QueryFilter,
    /// Restrict returned user fields; `None` returns everything.
    pub desired_fields: Option<Vec<String>>,
}

impl RecordQuery {
    /// Query matching every record of a type.
    pub fn all(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            filter: QueryFilter::default(),
            desired_fields: None,
        }
    }

    /// Restricts the query to records owned by the given users.
    pub fn owned_by(mut self, owners: Vec<RecordId>) -> Self {
        self.filter.owned_by = Some(owners);
        self
    }

    /// Restricts the query to records created locally after the given time.
    pub fn created_after(mut self, cutoff: SystemTime) -> Self {
        self.filter.created_after = Some(cutoff);
        self
    }

    /// Restricts the user fields returned for matching records.
    pub fn with_desired_fields(mut self, fields: Vec<String>) -> Self {
        self.desired_fields = Some(fields);
        self
    }
}

/// Opaque continuation token for a paginated query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCursor(Uuid);

impl QueryCursor {
    /// Creates a fresh cursor token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw token value.
    pub fn token(&self) -> Uuid {
        self.0
    }
}

impl Default for QueryCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// One page request of a query: either a new query or a continuation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPage {
    /// Start executing a query from its first page.
    Start(RecordQuery),
    /// Continue a prior page from its cursor.
    Continue(QueryCursor),
}

/// How a modify call treats records that changed since they were fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePolicy {
    /// Fail the save with a record-changed condition. The pipeline's
    /// conflict handling depends on this policy.
    #[default]
    FailOnChange,
    /// Overwrite only the changed fields without a conflict check.
    ChangedFields,
    /// Overwrite the whole record.
    AllFields,
}

/// Result of one query page.
#[derive(Debug, Default)]
pub struct QueryOutcome {
    /// Matched records, possibly partial when `error` is set.
    pub matched: Vec<RemoteRecord>,
    /// Continuation cursor when more pages exist.
    pub cursor: Option<QueryCursor>,
    /// Failure condition, if the page did not complete cleanly.
    pub error: Option<ServiceError>,
}

impl QueryOutcome {
    /// A failed page with no results.
    pub fn failed(error: ServiceError) -> Self {
        Self {
            matched: Vec::new(),
            cursor: None,
            error: Some(error),
        }
    }
}

/// Result of a fetch-by-ids call.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Fetched records, possibly partial when `error` is set.
    pub records: Vec<RemoteRecord>,
    /// Failure condition, if the fetch did not complete cleanly.
    pub error: Option<ServiceError>,
}

impl FetchOutcome {
    /// A failed fetch with no results.
    pub fn failed(error: ServiceError) -> Self {
        Self {
            records: Vec::new(),
            error: Some(error),
        }
    }
}

/// Result of a combined save-and-delete call.
#[derive(Debug, Default)]
pub struct ModifyOutcome {
    /// Records saved by the call, carrying fresh change tags.
    pub saved: Vec<RemoteRecord>,
    /// Identities deleted by the call.
    pub deleted: Vec<RecordId>,
    /// Failure condition, if the call did not complete cleanly.
    pub error: Option<ServiceError>,
}

impl ModifyOutcome {
    /// A failed modify with no per-record results.
    pub fn failed(error: ServiceError) -> Self {
        Self {
            saved: Vec::new(),
            deleted: Vec::new(),
            error: Some(error),
        }
    }
}

/// A server-side subscription to changes of one record type, scoped to a
/// set of owning users.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Stable subscription identifier.
    pub id: String,
    /// Record type the subscription watches.
    pub record_type: String,
    /// User record identities whose records fire notifications.
    pub owners: Vec<RecordId>,
}

impl Subscription {
    /// Creates a subscription.
    pub fn new(id: impl Into<String>, record_type: impl Into<String>, owners: Vec<RecordId>) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            owners,
        }
    }

    /// Whether this subscription already covers exactly the given owner set.
    /// Comparison is on normalized identities, order-insensitive.
    pub fn covers_same_owners(&self, owners: &[RecordId]) -> bool {
        let mine: BTreeSet<String> = self.owners.iter().map(normalized_identity).collect();
        let theirs: BTreeSet<String> = owners.iter().map(normalized_identity).collect();
        mine == theirs
    }
}

/// Why a push notification fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationReason {
    /// A matching record was created.
    RecordCreated,
    /// A matching record was updated.
    RecordUpdated,
    /// A matching record was deleted.
    RecordDeleted,
}

/// A push notification describing one remote change.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNotification {
    /// Subscription that fired.
    pub subscription_id: String,
    /// Change kind.
    pub reason: NotificationReason,
    /// Identity of the changed record, when the service includes it.
    pub record_id: Option<RecordId>,
    /// Scope of the change, when the service includes it.
    pub scope: Option<Scope>,
}

/// Discoverable identity of another user.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteUserInfo {
    /// Identity of the user's record.
    pub record_id: RecordId,
    /// Discoverable first name.
    pub first_name: Option<String>,
    /// Discoverable last name.
    pub last_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ZoneId, DEFAULT_ZONE_OWNER, DEFAULT_ZONE_OWNER_ALTERNATE};
    use crate::schema::EVENT_RECORD_TYPE;

    #[test]
    fn query_builder_accumulates_clauses() {
        let owners = vec![RecordId::in_default_zone("u1")];
        let cutoff = SystemTime::UNIX_EPOCH;
        let query = RecordQuery::all(EVENT_RECORD_TYPE)
            .owned_by(owners.clone())
            .created_after(cutoff)
            .with_desired_fields(vec!["createdLocallyAt".into()]);

        assert_eq!(query.record_type, EVENT_RECORD_TYPE);
        assert_eq!(query.filter.owned_by, Some(owners));
        assert_eq!(query.filter.created_after, Some(cutoff));
        assert_eq!(query.desired_fields.as_deref().map(<[String]>::len), Some(1));
    }

    #[test]
    fn cursors_are_unique() {
        assert_ne!(QueryCursor::new(), QueryCursor::new());
    }

    #[test]
    fn subscription_owner_comparison_is_normalized_and_unordered() {
        let a = RecordId::new("u1", ZoneId::new("_defaultZone", DEFAULT_ZONE_OWNER));
        let a_alt = RecordId::new("u1", ZoneId::new("_defaultZone", DEFAULT_ZONE_OWNER_ALTERNATE));
        let b = RecordId::in_default_zone("u2");

        let sub = Subscription::new("sub-1", EVENT_RECORD_TYPE, vec![a, b.clone()]);
        assert!(sub.covers_same_owners(&[b.clone(), a_alt.clone()]));
        assert!(!sub.covers_same_owners(&[a_alt]));
        assert!(!sub.covers_same_owners(&[b, RecordId::in_default_zone("u3")]));
    }

    #[test]
    fn failed_outcomes_carry_no_results() {
        let outcome = ModifyOutcome::failed(ServiceError::LimitExceeded);
        assert!(outcome.saved.is_empty());
        assert!(outcome.deleted.is_empty());
        assert_eq!(outcome.error, Some(ServiceError::LimitExceeded));
    }

    #[test]
    fn default_save_policy_fails_on_change() {
        assert_eq!(SavePolicy::default(), SavePolicy::FailOnChange);
    }
}
