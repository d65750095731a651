//! The chain resolving people into user records.

use std::sync::Arc;

use crate::context::WorkflowContext;
use crate::link::link;
use crate::ops::{
    FetchUserInfosOperation, InfoSource, PermissionStatusOperation, RequestPermissionOperation,
};
use crate::service::RemoteService;
use crate::task::TaskHandle;

/// Permission probe, permission request, then user info fetch.
///
/// The probe seeds the context so an already-granted permission skips the
/// request prompt; a denied request fails the chain before the directory
/// is touched.
pub struct DiscoveryComposition {
    status: Arc<PermissionStatusOperation>,
    fetch_infos: Arc<FetchUserInfosOperation>,
}

impl DiscoveryComposition {
    /// Builds and wires the chain for `source`.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        source: InfoSource,
    ) -> Self {
        let status = PermissionStatusOperation::new(Arc::clone(&context), Arc::clone(&remote));
        let request = RequestPermissionOperation::new(Arc::clone(&context), Arc::clone(&remote));
        let fetch_infos = FetchUserInfosOperation::new(context, remote, source);

        link(&status, &request);
        link(&request, &fetch_infos);

        DiscoveryComposition {
            status,
            fetch_infos,
        }
    }

    /// The chain's entry task.
    pub fn first(&self) -> TaskHandle {
        Arc::clone(&self.status) as TaskHandle
    }

    /// The chain's final task.
    pub fn last(&self) -> TaskHandle {
        Arc::clone(&self.fetch_infos) as TaskHandle
    }

    /// The info fetch, for reading the resolved users afterwards.
    pub fn fetch_infos(&self) -> &Arc<FetchUserInfosOperation> {
        &self.fetch_infos
    }
}
