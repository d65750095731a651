//! The in-memory remote service.

use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use convene_records::{
    AccountStatus, FetchOutcome, ModifyOutcome, PermissionStatus, QueryCursor, QueryOutcome,
    QueryPage, RecordId, RemoteRecord, RemoteUserInfo, SavePolicy, Scope, ServiceError,
    ServiceResult, Subscription, USER_RECORD_TYPE,
};
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::directory::Directory;
use crate::faults::{CallJournal, FaultPlan, RemoteCall};
use crate::query::{matching_ids, restrict_fields, OpenCursor};
use crate::tables::RecordTable;

#[derive(Default)]
struct ScopeState {
    records: RecordTable,
    subscriptions: BTreeMap<String, Subscription>,
}

struct ServerState {
    account: AccountStatus,
    current_user: Option<RecordId>,
    private: ScopeState,
    public: ScopeState,
    cursors: HashMap<Uuid, OpenCursor>,
    directory: Directory,
    permission: PermissionStatus,
    deny_requests: bool,
}

impl ServerState {
    fn new() -> Self {
        Self {
            account: AccountStatus::NoAccount,
            current_user: None,
            private: ScopeState::default(),
            public: ScopeState::default(),
            cursors: HashMap::new(),
            directory: Directory::default(),
            permission: PermissionStatus::InitialState,
            deny_requests: false,
        }
    }

    fn scope(&self, scope: Scope) -> &ScopeState {
        match scope {
            Scope::Private => &self.private,
            Scope::Public => &self.public,
        }
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut ScopeState {
        match scope {
            Scope::Private => &mut self.private,
            Scope::Public => &mut self.public,
        }
    }

    fn require_account(&self) -> Result<(), ServiceError> {
        if self.account.is_available() {
            Ok(())
        } else {
            Err(ServiceError::NotAuthenticated)
        }
    }

    fn require_discoverability(&self) -> Result<(), ServiceError> {
        self.require_account()?;
        if self.permission == PermissionStatus::Granted {
            Ok(())
        } else {
            Err(ServiceError::ServerRejected {
                message: "user discoverability permission was not granted".into(),
            })
        }
    }
}

fn batch_error(failures: Vec<(RecordId, ServiceError)>) -> Option<ServiceError> {
    if failures.is_empty() {
        None
    } else {
        Some(ServiceError::PartialFailure { failures })
    }
}

/// In-memory stand-in for the remote record service.
///
/// The server keeps real per-scope record tables with change tags, runs
/// queries with cursor continuation, enforces the fail-on-change save
/// policy, and maintains subscriptions and a discoverable-user directory.
/// Unlike a scripted mock it answers from state, so a whole sync run can
/// execute against it without canned responses.
///
/// Per-record failures come back inside a partial-failure condition with
/// sub-errors restricted to record-changed and unknown-item, the shapes a
/// sync pipeline resolves without aborting. Request-level conditions
/// (limit exceeded, not authenticated, injected faults) come back
/// top-level.
///
/// # Example
///
/// ```
/// use convene_remote_memory::MemoryRemote;
///
/// let remote = MemoryRemote::new();
/// let user = remote.sign_in("user-1");
/// assert_eq!(remote.current_user_id(), Ok(user));
/// ```
pub struct MemoryRemote {
    config: RemoteConfig,
    state: Mutex<ServerState>,
    faults: FaultPlan,
    journal: CallJournal,
}

impl MemoryRemote {
    /// Creates a server with the default configuration and no account.
    pub fn new() -> Self {
        Self::with_config(RemoteConfig::default())
    }

    /// Creates a server with an explicit configuration.
    pub fn with_config(config: RemoteConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ServerState::new()),
            faults: FaultPlan::default(),
            journal: CallJournal::default(),
        }
    }

    // --- account and permission administration ---------------------------

    /// Signs an account in and returns its user record id.
    ///
    /// The account's user record is planted empty in both scopes, the way
    /// the real service creates one per database the first time an account
    /// touches the container. Records of a previous session with the same
    /// name are kept.
    pub fn sign_in(&self, user_name: &str) -> RecordId {
        let id = RecordId::in_default_zone(user_name);
        let now = SystemTime::now();
        let mut state = self.state.lock();
        state.account = AccountStatus::Available;
        state.current_user = Some(id.clone());
        for scope in Scope::ALL {
            let table = &mut state.scope_mut(scope).records;
            if table.get(&id).is_none() {
                let mut record = RemoteRecord::new(USER_RECORD_TYPE, id.clone());
                record.creator = Some(id.clone());
                table.seed(record, now);
            }
        }
        id
    }

    /// Signs the account out.
    pub fn sign_out(&self) {
        let mut state = self.state.lock();
        state.account = AccountStatus::NoAccount;
        state.current_user = None;
    }

    /// Overrides the reported account status without touching the
    /// signed-in identity.
    pub fn set_account_status(&self, status: AccountStatus) {
        self.state.lock().account = status;
    }

    /// Sets the stored discoverability permission.
    pub fn set_permission(&self, status: PermissionStatus) {
        self.state.lock().permission = status;
    }

    /// Makes future permission prompts resolve to denied.
    pub fn deny_permission_requests(&self) {
        self.state.lock().deny_requests = true;
    }

    // --- data seeding and inspection --------------------------------------

    /// Plants a record server-side, assigning a change tag and timestamps
    /// where the caller left them out.
    pub fn seed_record(&self, scope: Scope, record: RemoteRecord) -> RemoteRecord {
        let mut state = self.state.lock();
        state
            .scope_mut(scope)
            .records
            .seed(record, SystemTime::now())
    }

    /// Lists a user in the discovery directory under the given addresses.
    pub fn register_user(&self, info: RemoteUserInfo, emails: &[&str]) {
        let emails = emails.iter().map(|email| email.to_string()).collect();
        self.state.lock().directory.register(info, emails);
    }

    /// Current server copy of a record.
    pub fn record(&self, scope: Scope, id: &RecordId) -> Option<RemoteRecord> {
        self.state.lock().scope(scope).records.get(id).cloned()
    }

    /// All records of one type in a scope, in normalized-identity order.
    pub fn records_of_type(&self, scope: Scope, record_type: &str) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .scope(scope)
            .records
            .iter()
            .filter(|record| record.record_type == record_type)
            .cloned()
            .collect()
    }

    /// Number of records stored in a scope.
    pub fn record_count(&self, scope: Scope) -> usize {
        self.state.lock().scope(scope).records.len()
    }

    /// Subscriptions currently registered in a scope.
    pub fn subscriptions(&self, scope: Scope) -> Vec<Subscription> {
        self.state
            .lock()
            .scope(scope)
            .subscriptions
            .values()
            .cloned()
            .collect()
    }

    // --- fault injection and the call journal -----------------------------

    /// Fails the next invocation of `call` with `error`. Repeated calls
    /// queue further failures.
    pub fn fail_next(&self, call: RemoteCall, error: ServiceError) {
        self.faults.push(call, error);
    }

    /// Journal of calls served so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.journal.calls()
    }

    /// Number of calls served for one entry point.
    pub fn call_count(&self, call: RemoteCall) -> usize {
        self.journal.count(call)
    }

    // --- service surface ---------------------------------------------------

    /// The signed-in account's status.
    pub fn account_status(&self) -> ServiceResult<AccountStatus> {
        self.journal.record(RemoteCall::AccountStatus);
        if let Some(error) = self.faults.take(RemoteCall::AccountStatus) {
            return Err(error);
        }
        Ok(self.state.lock().account)
    }

    /// Record id of the signed-in user.
    pub fn current_user_id(&self) -> ServiceResult<RecordId> {
        self.journal.record(RemoteCall::CurrentUserId);
        if let Some(error) = self.faults.take(RemoteCall::CurrentUserId) {
            return Err(error);
        }
        let state = self.state.lock();
        state.require_account()?;
        state.current_user.clone().ok_or(ServiceError::NotAuthenticated)
    }

    /// Runs one page of a record query.
    ///
    /// A `limit` of zero means no caller preference; either way the page
    /// never exceeds the configured maximum. Private-scope queries require
    /// a signed-in account.
    pub fn query_records(&self, scope: Scope, page: QueryPage, limit: usize) -> QueryOutcome {
        self.journal.record(RemoteCall::QueryRecords);
        if let Some(error) = self.faults.take(RemoteCall::QueryRecords) {
            return QueryOutcome::failed(error);
        }
        let mut state = self.state.lock();
        if scope == Scope::Private {
            if let Err(error) = state.require_account() {
                return QueryOutcome::failed(error);
            }
        }

        let (mut keys, desired_fields) = match page {
            QueryPage::Start(query) => {
                let keys = matching_ids(&state.scope(scope).records, &query);
                (keys, query.desired_fields)
            }
            QueryPage::Continue(cursor) => match state.cursors.remove(&cursor.token()) {
                Some(open) if open.scope == scope => (open.remaining, open.desired_fields),
                _ => {
                    return QueryOutcome::failed(ServiceError::ServerRejected {
                        message: "unknown query cursor".into(),
                    });
                }
            },
        };

        let page_limit = if limit == 0 {
            self.config.max_page
        } else {
            limit.min(self.config.max_page)
        };
        let rest = if keys.len() > page_limit {
            keys.split_off(page_limit)
        } else {
            Vec::new()
        };

        let matched: Vec<RemoteRecord> = keys
            .iter()
            .filter_map(|key| state.scope(scope).records.get_by_key(key))
            .map(|record| restrict_fields(record, desired_fields.as_deref()))
            .collect();

        let cursor = if rest.is_empty() {
            None
        } else {
            let token = QueryCursor::new();
            state.cursors.insert(
                token.token(),
                OpenCursor {
                    scope,
                    remaining: rest,
                    desired_fields,
                },
            );
            Some(token)
        };

        debug!(
            scope = %scope,
            matched = matched.len(),
            more = cursor.is_some(),
            "query page served"
        );
        QueryOutcome {
            matched,
            cursor,
            error: None,
        }
    }

    /// Fetches records by id. Missing ids come back as unknown-item
    /// sub-errors next to the records that were found.
    pub fn fetch_records(
        &self,
        scope: Scope,
        ids: Vec<RecordId>,
        desired_fields: Option<Vec<String>>,
    ) -> FetchOutcome {
        self.journal.record(RemoteCall::FetchRecords);
        if let Some(error) = self.faults.take(RemoteCall::FetchRecords) {
            return FetchOutcome::failed(error);
        }
        let state = self.state.lock();
        if scope == Scope::Private {
            if let Err(error) = state.require_account() {
                return FetchOutcome::failed(error);
            }
        }
        if ids.len() > self.config.batch_limit {
            return FetchOutcome::failed(ServiceError::LimitExceeded);
        }

        let mut records = Vec::new();
        let mut failures = Vec::new();
        for id in ids {
            match state.scope(scope).records.get(&id) {
                Some(record) => records.push(restrict_fields(record, desired_fields.as_deref())),
                None => failures.push((id.clone(), ServiceError::UnknownItem { id })),
            }
        }
        FetchOutcome {
            records,
            error: batch_error(failures),
        }
    }

    /// Saves and deletes records in one batch.
    ///
    /// Clean operations apply and report in `saved`/`deleted`; conflicting
    /// or unknown ones report as sub-errors without blocking the rest.
    /// Batches over the configured limit are rejected whole.
    pub fn modify_records(
        &self,
        scope: Scope,
        save: Vec<RemoteRecord>,
        delete: Vec<RecordId>,
        policy: SavePolicy,
    ) -> ModifyOutcome {
        self.journal.record(RemoteCall::ModifyRecords);
        if let Some(error) = self.faults.take(RemoteCall::ModifyRecords) {
            return ModifyOutcome::failed(error);
        }
        let mut state = self.state.lock();
        if let Err(error) = state.require_account() {
            return ModifyOutcome::failed(error);
        }
        if save.len() + delete.len() > self.config.batch_limit {
            return ModifyOutcome::failed(ServiceError::LimitExceeded);
        }

        let creator = state.current_user.clone();
        let now = SystemTime::now();
        let mut saved = Vec::new();
        let mut deleted = Vec::new();
        let mut failures = Vec::new();

        for record in save {
            let id = record.id.clone();
            match state
                .scope_mut(scope)
                .records
                .save(record, policy, creator.as_ref(), now)
            {
                Ok(stored) => saved.push(stored),
                Err(error) => failures.push((id, error)),
            }
        }
        for id in delete {
            match state.scope_mut(scope).records.delete(&id) {
                Ok(()) => deleted.push(id),
                Err(error) => failures.push((id, error)),
            }
        }

        debug!(
            scope = %scope,
            saved = saved.len(),
            deleted = deleted.len(),
            failed = failures.len(),
            "modify batch applied"
        );
        ModifyOutcome {
            saved,
            deleted,
            error: batch_error(failures),
        }
    }

    /// All subscriptions registered in a scope.
    pub fn fetch_subscriptions(&self, scope: Scope) -> ServiceResult<Vec<Subscription>> {
        self.journal.record(RemoteCall::FetchSubscriptions);
        if let Some(error) = self.faults.take(RemoteCall::FetchSubscriptions) {
            return Err(error);
        }
        let state = self.state.lock();
        state.require_account()?;
        Ok(state.scope(scope).subscriptions.values().cloned().collect())
    }

    /// Registers or replaces a subscription.
    pub fn save_subscription(
        &self,
        scope: Scope,
        subscription: Subscription,
    ) -> ServiceResult<Subscription> {
        self.journal.record(RemoteCall::SaveSubscription);
        if let Some(error) = self.faults.take(RemoteCall::SaveSubscription) {
            return Err(error);
        }
        let mut state = self.state.lock();
        state.require_account()?;
        state
            .scope_mut(scope)
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(subscription)
    }

    /// Removes a subscription by identifier.
    pub fn delete_subscription(&self, scope: Scope, id: &str) -> ServiceResult<()> {
        self.journal.record(RemoteCall::DeleteSubscription);
        if let Some(error) = self.faults.take(RemoteCall::DeleteSubscription) {
            return Err(error);
        }
        let mut state = self.state.lock();
        state.require_account()?;
        match state.scope_mut(scope).subscriptions.remove(id) {
            Some(_) => Ok(()),
            None => Err(ServiceError::ServerRejected {
                message: format!("unknown subscription: {id}"),
            }),
        }
    }

    /// The stored discoverability permission.
    pub fn permission_status(&self) -> ServiceResult<PermissionStatus> {
        self.journal.record(RemoteCall::PermissionStatus);
        if let Some(error) = self.faults.take(RemoteCall::PermissionStatus) {
            return Err(error);
        }
        let state = self.state.lock();
        state.require_account()?;
        Ok(state.permission)
    }

    /// Prompts for discoverability permission. A first prompt resolves per
    /// the configured policy; later prompts return the settled answer.
    pub fn request_permission(&self) -> ServiceResult<PermissionStatus> {
        self.journal.record(RemoteCall::RequestPermission);
        if let Some(error) = self.faults.take(RemoteCall::RequestPermission) {
            return Err(error);
        }
        let mut state = self.state.lock();
        state.require_account()?;
        if state.permission == PermissionStatus::InitialState {
            state.permission = if state.deny_requests {
                PermissionStatus::Denied
            } else {
                PermissionStatus::Granted
            };
        }
        Ok(state.permission)
    }

    /// Every discoverable user. Requires the granted permission.
    pub fn discover_users(&self) -> ServiceResult<Vec<RemoteUserInfo>> {
        self.journal.record(RemoteCall::DiscoverUsers);
        if let Some(error) = self.faults.take(RemoteCall::DiscoverUsers) {
            return Err(error);
        }
        let state = self.state.lock();
        state.require_discoverability()?;
        Ok(state.directory.all())
    }

    /// Looks up discoverable users by email address. Requires the granted
    /// permission.
    pub fn lookup_users_by_email(&self, emails: Vec<String>) -> ServiceResult<Vec<RemoteUserInfo>> {
        self.journal.record(RemoteCall::LookupUsersByEmail);
        if let Some(error) = self.faults.take(RemoteCall::LookupUsersByEmail) {
            return Err(error);
        }
        let state = self.state.lock();
        state.require_discoverability()?;
        Ok(state.directory.lookup_by_email(&emails))
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}
