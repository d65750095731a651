//! The workflow operations composed into synchronization runs.
//!
//! Each operation is a [`WorkflowTask`](crate::task::WorkflowTask) doing
//! one job: probing the account, linking the signed-in user, collecting
//! local changes, preparing queries, keeping the event subscription
//! current, resolving discoverable users, routing push notifications, and
//! closing a run out. Operations exchange data through link transforms and
//! the shared [`WorkflowContext`](crate::context::WorkflowContext).

mod account;
mod collect;
mod discovery;
mod finish;
mod notification;
mod subscription;
mod users;

pub use account::{AccountStatusOperation, FetchUserIdOperation, LinkUserOperation};
pub use collect::CollectChangesOperation;
pub use discovery::{
    FetchUserInfosOperation, InfoSource, PermissionStatusOperation, RequestPermissionOperation,
    UpdateUserInfosOperation,
};
pub use finish::{CleanupOperation, CompletionOperation, SyncCompletion};
pub use notification::RouteNotificationOperation;
pub use subscription::UpdateSubscriptionOperation;
pub use users::{PrepareEventQueriesOperation, UsersWithFriendsOperation};
