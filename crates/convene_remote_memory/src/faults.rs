//! Scripted failures and the call journal.
//!
//! Tests steer the server by queuing one-shot failures against a named
//! entry point and by reading back the ordered journal of calls served.

use std::collections::{HashMap, VecDeque};

use convene_records::ServiceError;
use parking_lot::Mutex;

/// One entry point of the remote service surface.
///
/// Used both to target injected faults and to identify journal entries.
/// Labels match the service method names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    /// `account_status`.
    AccountStatus,
    /// `current_user_id`.
    CurrentUserId,
    /// `query_records`.
    QueryRecords,
    /// `fetch_records`.
    FetchRecords,
    /// `modify_records`.
    ModifyRecords,
    /// `fetch_subscriptions`.
    FetchSubscriptions,
    /// `save_subscription`.
    SaveSubscription,
    /// `delete_subscription`.
    DeleteSubscription,
    /// `permission_status`.
    PermissionStatus,
    /// `request_permission`.
    RequestPermission,
    /// `discover_users`.
    DiscoverUsers,
    /// `lookup_users_by_email`.
    LookupUsersByEmail,
}

impl RemoteCall {
    /// Stable label, matching the service method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteCall::AccountStatus => "account_status",
            RemoteCall::CurrentUserId => "current_user_id",
            RemoteCall::QueryRecords => "query_records",
            RemoteCall::FetchRecords => "fetch_records",
            RemoteCall::ModifyRecords => "modify_records",
            RemoteCall::FetchSubscriptions => "fetch_subscriptions",
            RemoteCall::SaveSubscription => "save_subscription",
            RemoteCall::DeleteSubscription => "delete_subscription",
            RemoteCall::PermissionStatus => "permission_status",
            RemoteCall::RequestPermission => "request_permission",
            RemoteCall::DiscoverUsers => "discover_users",
            RemoteCall::LookupUsersByEmail => "lookup_users_by_email",
        }
    }
}

/// One-shot failures queued per entry point, consumed in FIFO order.
#[derive(Default)]
pub(crate) struct FaultPlan {
    queued: Mutex<HashMap<RemoteCall, VecDeque<ServiceError>>>,
}

impl FaultPlan {
    /// Queues a failure for the next invocation of `call`.
    pub(crate) fn push(&self, call: RemoteCall, error: ServiceError) {
        self.queued.lock().entry(call).or_default().push_back(error);
    }

    /// Takes the next queued failure for `call`, if any.
    pub(crate) fn take(&self, call: RemoteCall) -> Option<ServiceError> {
        self.queued
            .lock()
            .get_mut(&call)
            .and_then(VecDeque::pop_front)
    }
}

/// Ordered record of every call the server has served.
#[derive(Default)]
pub(crate) struct CallJournal {
    calls: Mutex<Vec<RemoteCall>>,
}

impl CallJournal {
    pub(crate) fn record(&self, call: RemoteCall) {
        self.calls.lock().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, call: RemoteCall) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }
}
