//! Finding other users and folding what they report into the local store.

use std::sync::Arc;

use async_trait::async_trait;
use convene_records::{PermissionStatus, RemoteUserInfo, Scope};
use convene_store::{LocalId, LocalStore, StoreTxn, SyncReference, User};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::context::WorkflowContext;
use crate::error::{SyncError, SyncResult};
use crate::service::RemoteService;
use crate::task::{TaskMeta, WorkflowTask};

/// Probes the discoverability permission and records it on the context.
///
/// Purely informational: an unfavorable status is data for the request
/// operation, not a failure.
pub struct PermissionStatusOperation {
    meta: TaskMeta,
    remote: Arc<dyn RemoteService>,
}

impl PermissionStatusOperation {
    /// Creates the operation.
    pub fn new(context: Arc<WorkflowContext>, remote: Arc<dyn RemoteService>) -> Arc<Self> {
        Arc::new(PermissionStatusOperation {
            meta: TaskMeta::new("discovery.permission-status", context),
            remote,
        })
    }
}

#[async_trait]
impl WorkflowTask for PermissionStatusOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.remote.permission_status().await {
            Ok(status) => {
                debug!(?status, "discoverability permission probed");
                self.meta.context().set_permission_status(status);
                self.meta.finish();
            }
            Err(error) => self.meta.finish_with_error(error.into()),
        }
    }
}

/// Asks the user for discoverability permission unless the context already
/// knows it was granted.
///
/// Anything short of a grant fails the operation so dependents that need
/// discoverability are cancelled instead of failing remotely one by one.
pub struct RequestPermissionOperation {
    meta: TaskMeta,
    remote: Arc<dyn RemoteService>,
}

impl RequestPermissionOperation {
    /// Creates the operation.
    pub fn new(context: Arc<WorkflowContext>, remote: Arc<dyn RemoteService>) -> Arc<Self> {
        Arc::new(RequestPermissionOperation {
            meta: TaskMeta::new("discovery.request-permission", context),
            remote,
        })
    }
}

#[async_trait]
impl WorkflowTask for RequestPermissionOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        if self.meta.context().permission_status() == PermissionStatus::Granted {
            debug!("discoverability already granted");
            self.meta.finish();
            return;
        }
        match self.remote.request_permission().await {
            Ok(status) => {
                self.meta.context().set_permission_status(status);
                if status == PermissionStatus::Granted {
                    self.meta.finish();
                } else {
                    info!(?status, "discoverability permission not granted");
                    self.meta
                        .finish_with_error(SyncError::PermissionNotGranted { status });
                }
            }
            Err(error) => self.meta.finish_with_error(error.into()),
        }
    }
}

/// Where [`FetchUserInfosOperation`] draws its user infos from.
#[derive(Debug, Clone)]
pub enum InfoSource {
    /// Every user discoverable to the signed-in account.
    AllDiscoverable,
    /// Users reachable under any of the given email addresses.
    Emails(Vec<String>),
}

/// Fetches user infos from the remote directory.
pub struct FetchUserInfosOperation {
    meta: TaskMeta,
    remote: Arc<dyn RemoteService>,
    source: InfoSource,
    infos: Mutex<Vec<RemoteUserInfo>>,
}

impl FetchUserInfosOperation {
    /// Creates the operation for the given source.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        source: InfoSource,
    ) -> Arc<Self> {
        Arc::new(FetchUserInfosOperation {
            meta: TaskMeta::new("discovery.user-infos", context),
            remote,
            source,
            infos: Mutex::new(Vec::new()),
        })
    }

    /// The fetched infos, once the operation succeeded.
    pub fn infos(&self) -> Vec<RemoteUserInfo> {
        self.infos.lock().clone()
    }
}

#[async_trait]
impl WorkflowTask for FetchUserInfosOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        let result = match &self.source {
            InfoSource::AllDiscoverable => self.remote.discover_users().await,
            InfoSource::Emails(emails) => {
                self.remote.lookup_users_by_email(emails.clone()).await
            }
        };
        match result {
            Ok(infos) => {
                debug!(count = infos.len(), "fetched user infos");
                *self.infos.lock() = infos;
                self.meta.finish();
            }
            Err(error) => self.meta.finish_with_error(error.into()),
        }
    }
}

/// Folds discovered user infos into the local store: updates known users,
/// creates unknown ones, and befriends them all on the linked user.
///
/// A name change, like a friend-list change, marks the affected user's
/// private reference unsynchronized so the next sync pushes it back out.
pub struct UpdateUserInfosOperation {
    meta: TaskMeta,
    store: Arc<LocalStore>,
    infos: Mutex<Vec<RemoteUserInfo>>,
}

impl UpdateUserInfosOperation {
    /// Creates the operation.
    pub fn new(context: Arc<WorkflowContext>, store: Arc<LocalStore>) -> Arc<Self> {
        Arc::new(UpdateUserInfosOperation {
            meta: TaskMeta::new("discovery.update-users", context),
            store,
            infos: Mutex::new(Vec::new()),
        })
    }

    /// Supplies the infos to apply, usually linked from a
    /// [`FetchUserInfosOperation`].
    pub fn set_infos(&self, infos: Vec<RemoteUserInfo>) {
        *self.infos.lock() = infos;
    }

    fn apply(&self, txn: &mut StoreTxn) -> SyncResult<()> {
        let infos = self.infos.lock().clone();
        if infos.is_empty() {
            debug!("no user infos to apply");
            return Ok(());
        }
        let Some(linked) = self.meta.context().linked_local_user() else {
            return Err(SyncError::internal_inconsistency(
                "no linked local user to attach discovered users to",
            ));
        };

        let mut touched = Vec::with_capacity(infos.len());
        for info in &infos {
            match txn.entity_for_record(&info.record_id, Scope::Public) {
                Some(entity) => {
                    let user = txn.require_user_mut(entity)?;
                    if apply_names(user, info) {
                        info!(id = %info.record_id, "user info changed, will push");
                        dirty_private_reference(txn, entity)?;
                    }
                    touched.push(entity);
                }
                None => {
                    let mut user = User::new();
                    apply_names(&mut user, info);
                    let entity = txn.add_user(user);
                    txn.set_reference(SyncReference::new(
                        entity,
                        Scope::Public,
                        info.record_id.clone(),
                    ))?;
                    debug!(id = %info.record_id, "created local user for discovered info");
                    touched.push(entity);
                }
            }
        }

        let mut friends_changed = false;
        {
            let current = txn.require_user_mut(linked)?;
            for entity in touched {
                if entity != linked && !current.has_friend(entity) {
                    current.friends.push(entity);
                    friends_changed = true;
                }
            }
        }
        if friends_changed {
            info!("friend list grew, marking linked user for push");
            dirty_private_reference(txn, linked)?;
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowTask for UpdateUserInfosOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.store.with_transaction(|txn| self.apply(txn)) {
            Ok(()) => self.meta.finish(),
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}

fn apply_names(user: &mut User, info: &RemoteUserInfo) -> bool {
    let mut changed = false;
    if user.first_name != info.first_name {
        user.first_name = info.first_name.clone();
        changed = true;
    }
    if user.last_name != info.last_name {
        user.last_name = info.last_name.clone();
        changed = true;
    }
    changed
}

/// Flags the entity's private reference for push, seeding it with the
/// public record id when the private scope has none yet.
fn dirty_private_reference(txn: &mut StoreTxn, entity: LocalId) -> SyncResult<()> {
    if let Some(reference) = txn.reference_mut(entity, Scope::Private) {
        reference.synchronized = false;
        return Ok(());
    }
    let Some(record_id) = txn
        .reference(entity, Scope::Public)
        .map(|reference| reference.record_id.clone())
    else {
        error!(%entity, "no reference in either scope to mark for push");
        return Ok(());
    };
    txn.set_reference(SyncReference::new(entity, Scope::Private, record_id))?;
    Ok(())
}
