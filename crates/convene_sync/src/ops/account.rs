//! Account probing and user linking.

use std::sync::Arc;

use async_trait::async_trait;
use convene_records::{RecordId, Scope};
use convene_store::{LocalId, LocalStore, SyncReference, User};
use parking_lot::Mutex;
use tracing::debug;

use crate::context::WorkflowContext;
use crate::error::SyncError;
use crate::service::RemoteService;
use crate::task::{TaskMeta, WorkflowTask};

/// Verifies the signed-in account can sync.
///
/// Runs even when the workflow already failed, so a stale account status
/// never sticks. Skips the remote call when the context already knows the
/// account is available.
pub struct AccountStatusOperation {
    meta: TaskMeta,
    remote: Arc<dyn RemoteService>,
}

impl AccountStatusOperation {
    /// Creates the operation.
    pub fn new(context: Arc<WorkflowContext>, remote: Arc<dyn RemoteService>) -> Arc<Self> {
        Arc::new(AccountStatusOperation {
            meta: TaskMeta::new("account.status", context).ignoring_context_errors(),
            remote,
        })
    }
}

#[async_trait]
impl WorkflowTask for AccountStatusOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        if self.meta.context().account_status().is_available() {
            debug!("account already known to be available");
            self.meta.finish();
            return;
        }
        match self.remote.account_status().await {
            Ok(status) => {
                self.meta.context().set_account_status(status);
                if status.is_available() {
                    self.meta.finish();
                } else {
                    self.meta
                        .finish_with_error(SyncError::UpdatesNotPermitted { status });
                }
            }
            Err(error) => self.meta.finish_with_error(error.into()),
        }
    }
}

/// Fetches the record id of the signed-in user into the context.
///
/// Always asks the remote; a cached id could belong to a previous account.
pub struct FetchUserIdOperation {
    meta: TaskMeta,
    remote: Arc<dyn RemoteService>,
    fetched: Mutex<Option<RecordId>>,
}

impl FetchUserIdOperation {
    /// Creates the operation.
    pub fn new(context: Arc<WorkflowContext>, remote: Arc<dyn RemoteService>) -> Arc<Self> {
        Arc::new(FetchUserIdOperation {
            meta: TaskMeta::new("account.user-id", context).ignoring_context_errors(),
            remote,
            fetched: Mutex::new(None),
        })
    }

    /// The fetched record id, once the operation succeeded.
    pub fn fetched_id(&self) -> Option<RecordId> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl WorkflowTask for FetchUserIdOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.remote.current_user_id().await {
            Ok(id) => {
                debug!(%id, "remote reported current user");
                self.meta.context().set_current_user_id(id.clone());
                *self.fetched.lock() = Some(id);
                self.meta.finish();
            }
            Err(error) => self.meta.finish_with_error(error.into()),
        }
    }
}

/// Resolves which local user stands for the signed-in account and makes
/// sure both scopes reference the account's user record.
///
/// Resolution order: a user already holding the record id in the public
/// scope, then in the private scope, then the most recently created user
/// that was never linked, and finally a fresh user.
pub struct LinkUserOperation {
    meta: TaskMeta,
    store: Arc<LocalStore>,
    input: Mutex<Option<RecordId>>,
    resolved: Mutex<Option<(RecordId, LocalId)>>,
}

impl LinkUserOperation {
    /// Creates the operation.
    pub fn new(context: Arc<WorkflowContext>, store: Arc<LocalStore>) -> Arc<Self> {
        Arc::new(LinkUserOperation {
            meta: TaskMeta::new("account.link-user", context),
            store,
            input: Mutex::new(None),
            resolved: Mutex::new(None),
        })
    }

    /// Hands in the record id to link, ahead of the context fallback.
    pub fn set_record_id(&self, id: RecordId) {
        *self.input.lock() = Some(id);
    }

    /// The linked local user, once resolved.
    pub fn linked_user(&self) -> Option<LocalId> {
        self.resolved.lock().as_ref().map(|(_, local)| *local)
    }

    /// The linked (record id, local user) pair, once resolved.
    pub fn resolved(&self) -> Option<(RecordId, LocalId)> {
        self.resolved.lock().clone()
    }
}

#[async_trait]
impl WorkflowTask for LinkUserOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        let id = self
            .input
            .lock()
            .take()
            .or_else(|| self.meta.context().current_user_id());
        let Some(id) = id else {
            self.meta.finish_with_error(SyncError::internal_inconsistency(
                "could not obtain the current user record id",
            ));
            return;
        };

        let result = self.store.with_transaction(|txn| {
            let candidate = txn
                .entity_for_record(&id, Scope::Public)
                .filter(|entity| txn.user(*entity).is_some())
                .or_else(|| {
                    txn.entity_for_record(&id, Scope::Private)
                        .filter(|entity| txn.user(*entity).is_some())
                })
                .or_else(|| {
                    // A user created before the first sync has no references
                    // yet; the newest such user is the one the account owns.
                    txn.users()
                        .filter(|user| txn.reference(user.id, Scope::Private).is_none())
                        .max_by_key(|user| user.created_at)
                        .map(|user| user.id)
                });
            let user = match candidate {
                Some(user) => user,
                None => txn.add_user(User::new()),
            };
            // The account's user record shares one record name across both
            // scopes.
            if txn.reference(user, Scope::Private).is_none() {
                txn.set_reference(SyncReference::new(user, Scope::Private, id.clone()))?;
            }
            if txn.reference(user, Scope::Public).is_none() {
                txn.set_reference(SyncReference::new(user, Scope::Public, id.clone()))?;
            }
            Ok::<_, SyncError>(user)
        });

        match result {
            Ok(user) => {
                debug!(record = %id, local = %user, "linked current user");
                self.meta.context().set_linked_local_user(user);
                *self.resolved.lock() = Some((id, user));
                self.meta.finish();
            }
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}
