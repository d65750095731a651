//! The setup chain every workflow run starts with.

use std::sync::Arc;

use convene_store::LocalStore;

use crate::context::WorkflowContext;
use crate::link::{link, link_transform};
use crate::ops::{AccountStatusOperation, FetchUserIdOperation, LinkUserOperation};
use crate::service::RemoteService;
use crate::task::TaskHandle;

/// Account probe, user id fetch and local user linking, in order.
///
/// Every entry point runs this first: nothing else is worth doing until
/// the signed-in account is confirmed usable and the local store knows
/// which user it belongs to.
pub struct SetupComposition {
    account: Arc<AccountStatusOperation>,
    link_user: Arc<LinkUserOperation>,
}

impl SetupComposition {
    /// Builds and wires the chain.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        store: Arc<LocalStore>,
    ) -> Self {
        let account = AccountStatusOperation::new(Arc::clone(&context), Arc::clone(&remote));
        let fetch_user = FetchUserIdOperation::new(Arc::clone(&context), remote);
        let link_user = LinkUserOperation::new(context, store);

        link(&account, &fetch_user);
        link_transform(&fetch_user, &link_user, |fetch, link| {
            if let Some(id) = fetch.fetched_id() {
                link.set_record_id(id);
            }
        });

        SetupComposition { account, link_user }
    }

    /// The chain's entry task.
    pub fn first(&self) -> TaskHandle {
        Arc::clone(&self.account) as TaskHandle
    }

    /// The chain's final task.
    pub fn last(&self) -> TaskHandle {
        Arc::clone(&self.link_user) as TaskHandle
    }

    /// The linking stage, for reading the resolved user afterwards.
    pub fn link_user(&self) -> &Arc<LinkUserOperation> {
        &self.link_user
    }
}
