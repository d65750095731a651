//! The remote service boundary.
//!
//! [`RemoteService`] is the engine's only view of the cloud backend. Batch
//! calls return outcome structs rather than `Result` because the remote
//! hands back partial results next to an error, and the pipeline needs
//! both.

use std::collections::VecDeque;
use std::time::SystemTime;

use async_trait::async_trait;
use convene_records::{
    AccountStatus, FetchOutcome, ModifyOutcome, PermissionStatus, QueryOutcome, QueryPage,
    RecordId, RemoteRecord, RemoteUserInfo, SavePolicy, Scope, ServiceError, ServiceResult,
    Subscription,
};
use parking_lot::Mutex;
use uuid::Uuid;

/// Async interface to the remote record service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// The signed-in account's status.
    async fn account_status(&self) -> ServiceResult<AccountStatus>;

    /// Record id of the signed-in user.
    async fn current_user_id(&self) -> ServiceResult<RecordId>;

    /// Runs one page of a record query. `limit` caps the page size.
    async fn query_records(&self, scope: Scope, page: QueryPage, limit: usize) -> QueryOutcome;

    /// Fetches records by id, optionally restricted to `desired_fields`.
    async fn fetch_records(
        &self,
        scope: Scope,
        ids: Vec<RecordId>,
        desired_fields: Option<Vec<String>>,
    ) -> FetchOutcome;

    /// Saves and deletes records in one batch.
    async fn modify_records(
        &self,
        scope: Scope,
        save: Vec<RemoteRecord>,
        delete: Vec<RecordId>,
        policy: SavePolicy,
    ) -> ModifyOutcome;

    /// All subscriptions registered in `scope`.
    async fn fetch_subscriptions(&self, scope: Scope) -> ServiceResult<Vec<Subscription>>;

    /// Registers or replaces a subscription.
    async fn save_subscription(
        &self,
        scope: Scope,
        subscription: Subscription,
    ) -> ServiceResult<Subscription>;

    /// Removes a subscription by identifier.
    async fn delete_subscription(&self, scope: Scope, id: &str) -> ServiceResult<()>;

    /// Whether the user made themself discoverable to other users.
    async fn permission_status(&self) -> ServiceResult<PermissionStatus>;

    /// Prompts for discoverability permission.
    async fn request_permission(&self) -> ServiceResult<PermissionStatus>;

    /// All discoverable users known to the signed-in account.
    async fn discover_users(&self) -> ServiceResult<Vec<RemoteUserInfo>>;

    /// Looks up discoverable users by email address.
    async fn lookup_users_by_email(&self, emails: Vec<String>)
        -> ServiceResult<Vec<RemoteUserInfo>>;
}

/// Scripted [`RemoteService`] for unit tests.
///
/// Responses are queued per call family; when a queue is empty the mock
/// falls back to a benign default (empty query pages, echoed modifies with
/// fresh change tags). Every call is journaled so tests can assert the
/// remote was, or was not, touched.
#[derive(Default)]
pub struct MockRemote {
    account: Mutex<Option<ServiceResult<AccountStatus>>>,
    user_id: Mutex<Option<ServiceResult<RecordId>>>,
    query_script: Mutex<VecDeque<QueryOutcome>>,
    fetch_script: Mutex<VecDeque<FetchOutcome>>,
    modify_script: Mutex<VecDeque<ModifyOutcome>>,
    subscriptions: Mutex<Vec<Subscription>>,
    subscription_fault: Mutex<Option<ServiceError>>,
    permission: Mutex<Option<ServiceResult<PermissionStatus>>>,
    request_response: Mutex<Option<ServiceResult<PermissionStatus>>>,
    discovered: Mutex<Option<ServiceResult<Vec<RemoteUserInfo>>>>,
    lookup: Mutex<Option<ServiceResult<Vec<RemoteUserInfo>>>>,
    calls: Mutex<Vec<String>>,
}

impl MockRemote {
    /// Creates a mock with an available account and empty data.
    pub fn new() -> Self {
        MockRemote::default()
    }

    /// Overrides the account status response.
    pub fn set_account_response(&self, response: ServiceResult<AccountStatus>) {
        *self.account.lock() = Some(response);
    }

    /// Overrides the current-user response.
    pub fn set_user_id_response(&self, response: ServiceResult<RecordId>) {
        *self.user_id.lock() = Some(response);
    }

    /// Queues the next query outcome.
    pub fn push_query_outcome(&self, outcome: QueryOutcome) {
        self.query_script.lock().push_back(outcome);
    }

    /// Queues the next fetch outcome.
    pub fn push_fetch_outcome(&self, outcome: FetchOutcome) {
        self.fetch_script.lock().push_back(outcome);
    }

    /// Queues the next modify outcome.
    pub fn push_modify_outcome(&self, outcome: ModifyOutcome) {
        self.modify_script.lock().push_back(outcome);
    }

    /// Seeds the registered subscriptions.
    pub fn set_subscriptions(&self, subscriptions: Vec<Subscription>) {
        *self.subscriptions.lock() = subscriptions;
    }

    /// Registered subscriptions, as saved through the mock.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    /// Fails the next subscription call with `error`.
    pub fn set_subscription_fault(&self, error: ServiceError) {
        *self.subscription_fault.lock() = Some(error);
    }

    /// Overrides the permission status response.
    pub fn set_permission_response(&self, response: ServiceResult<PermissionStatus>) {
        *self.permission.lock() = Some(response);
    }

    /// Overrides the permission request response.
    pub fn set_request_response(&self, response: ServiceResult<PermissionStatus>) {
        *self.request_response.lock() = Some(response);
    }

    /// Overrides the discover response.
    pub fn set_discovered(&self, response: ServiceResult<Vec<RemoteUserInfo>>) {
        *self.discovered.lock() = Some(response);
    }

    /// Overrides the email lookup response.
    pub fn set_lookup_response(&self, response: ServiceResult<Vec<RemoteUserInfo>>) {
        *self.lookup.lock() = Some(response);
    }

    /// Journal of calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of calls to the named method.
    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == name).count()
    }

    fn record_call(&self, name: &str) {
        self.calls.lock().push(name.to_string());
    }

    fn echo_modify(
        &self,
        save: Vec<RemoteRecord>,
        delete: Vec<RecordId>,
    ) -> ModifyOutcome {
        let creator = self
            .user_id
            .lock()
            .clone()
            .and_then(|r| r.ok())
            .or_else(|| Some(RecordId::in_default_zone("mock-current-user")));
        let now = SystemTime::now();
        let saved = save
            .into_iter()
            .map(|mut record| {
                record.change_tag = Some(Uuid::new_v4().to_string());
                record.modified_at = Some(now);
                if record.created_at.is_none() {
                    record.created_at = Some(now);
                }
                if record.creator.is_none() {
                    record.creator = creator.clone();
                }
                record
            })
            .collect();
        ModifyOutcome {
            saved,
            deleted: delete,
            error: None,
        }
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn account_status(&self) -> ServiceResult<AccountStatus> {
        self.record_call("account_status");
        self.account
            .lock()
            .clone()
            .unwrap_or(Ok(AccountStatus::Available))
    }

    async fn current_user_id(&self) -> ServiceResult<RecordId> {
        self.record_call("current_user_id");
        self.user_id
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(RecordId::in_default_zone("mock-current-user")))
    }

    async fn query_records(&self, _scope: Scope, _page: QueryPage, _limit: usize) -> QueryOutcome {
        self.record_call("query_records");
        self.query_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| QueryOutcome {
                matched: Vec::new(),
                cursor: None,
                error: None,
            })
    }

    async fn fetch_records(
        &self,
        _scope: Scope,
        _ids: Vec<RecordId>,
        _desired_fields: Option<Vec<String>>,
    ) -> FetchOutcome {
        self.record_call("fetch_records");
        self.fetch_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| FetchOutcome {
                records: Vec::new(),
                error: None,
            })
    }

    async fn modify_records(
        &self,
        _scope: Scope,
        save: Vec<RemoteRecord>,
        delete: Vec<RecordId>,
        _policy: SavePolicy,
    ) -> ModifyOutcome {
        self.record_call("modify_records");
        let scripted = self.modify_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.echo_modify(save, delete))
    }

    async fn fetch_subscriptions(&self, _scope: Scope) -> ServiceResult<Vec<Subscription>> {
        self.record_call("fetch_subscriptions");
        if let Some(error) = self.subscription_fault.lock().take() {
            return Err(error);
        }
        Ok(self.subscriptions.lock().clone())
    }

    async fn save_subscription(
        &self,
        _scope: Scope,
        subscription: Subscription,
    ) -> ServiceResult<Subscription> {
        self.record_call("save_subscription");
        if let Some(error) = self.subscription_fault.lock().take() {
            return Err(error);
        }
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|s| s.id != subscription.id);
        subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn delete_subscription(&self, _scope: Scope, id: &str) -> ServiceResult<()> {
        self.record_call("delete_subscription");
        if let Some(error) = self.subscription_fault.lock().take() {
            return Err(error);
        }
        self.subscriptions.lock().retain(|s| s.id != id);
        Ok(())
    }

    async fn permission_status(&self) -> ServiceResult<PermissionStatus> {
        self.record_call("permission_status");
        self.permission
            .lock()
            .clone()
            .unwrap_or(Ok(PermissionStatus::Granted))
    }

    async fn request_permission(&self) -> ServiceResult<PermissionStatus> {
        self.record_call("request_permission");
        self.request_response
            .lock()
            .clone()
            .unwrap_or(Ok(PermissionStatus::Granted))
    }

    async fn discover_users(&self) -> ServiceResult<Vec<RemoteUserInfo>> {
        self.record_call("discover_users");
        self.discovered.lock().clone().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn lookup_users_by_email(
        &self,
        _emails: Vec<String>,
    ) -> ServiceResult<Vec<RemoteUserInfo>> {
        self.record_call("lookup_users_by_email");
        self.lookup.lock().clone().unwrap_or_else(|| Ok(Vec::new()))
    }
}
