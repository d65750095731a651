//! Shared state for one workflow run.

use convene_records::{AccountStatus, PermissionStatus, RecordId};
use convene_store::LocalId;
use parking_lot::RwLock;

use crate::error::SyncError;

#[derive(Debug)]
struct ContextState {
    account_status: AccountStatus,
    permission_status: PermissionStatus,
    current_user_id: Option<RecordId>,
    linked_local_user: Option<LocalId>,
    errors: Vec<SyncError>,
}

impl Default for ContextState {
    fn default() -> Self {
        ContextState {
            account_status: AccountStatus::Unknown,
            permission_status: PermissionStatus::InitialState,
            current_user_id: None,
            linked_local_user: None,
            errors: Vec::new(),
        }
    }
}

/// Thread-safe bag of state shared by every operation in one workflow run.
///
/// A fresh context is created per entry point and dropped when the run's
/// completion handler has fired. Errors accumulate in the order they were
/// recorded; the first one is the run's terminal error.
#[derive(Debug, Default)]
pub struct WorkflowContext {
    inner: RwLock<ContextState>,
}

impl WorkflowContext {
    /// Creates an empty context with an unknown account status.
    pub fn new() -> Self {
        WorkflowContext::default()
    }

    /// Last account status reported by the remote.
    pub fn account_status(&self) -> AccountStatus {
        self.inner.read().account_status
    }

    /// Records the account status for downstream operations.
    pub fn set_account_status(&self, status: AccountStatus) {
        self.inner.write().account_status = status;
    }

    /// Last known discoverability permission status.
    pub fn permission_status(&self) -> PermissionStatus {
        self.inner.read().permission_status
    }

    /// Records the discoverability permission status.
    pub fn set_permission_status(&self, status: PermissionStatus) {
        self.inner.write().permission_status = status;
    }

    /// Record id of the remote user, once fetched.
    pub fn current_user_id(&self) -> Option<RecordId> {
        self.inner.read().current_user_id.clone()
    }

    /// Records the remote user's record id.
    pub fn set_current_user_id(&self, id: RecordId) {
        self.inner.write().current_user_id = Some(id);
    }

    /// Local entity linked to the remote user, once resolved.
    pub fn linked_local_user(&self) -> Option<LocalId> {
        self.inner.read().linked_local_user
    }

    /// Records the local entity standing in for the remote user.
    pub fn set_linked_local_user(&self, id: LocalId) {
        self.inner.write().linked_local_user = Some(id);
    }

    /// Appends an error. Earlier errors are never displaced.
    pub fn push_error(&self, error: SyncError) {
        self.inner.write().errors.push(error);
    }

    /// The run's terminal error: the first one recorded.
    pub fn first_error(&self) -> Option<SyncError> {
        self.inner.read().errors.first().cloned()
    }

    /// True once any operation has recorded an error.
    pub fn has_error(&self) -> bool {
        !self.inner.read().errors.is_empty()
    }

    /// Every error recorded so far, oldest first.
    pub fn all_errors(&self) -> Vec<SyncError> {
        self.inner.read().errors.clone()
    }
}
