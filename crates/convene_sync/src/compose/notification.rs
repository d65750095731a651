//! The targeted graph behind a push notification.

use std::sync::Arc;

use convene_records::RemoteNotification;
use convene_store::LocalStore;

use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::entity::EntityRegistry;
use crate::link::link_transform;
use crate::ops::RouteNotificationOperation;
use crate::pipeline::RecordSyncOperation;
use crate::service::RemoteService;
use crate::task::TaskHandle;

/// Notification routing feeding a single-scope pipeline.
///
/// The pipeline is created for whichever scope the notification names, so
/// a private-database push never causes public traffic and vice versa.
pub struct NotificationComposition {
    route: Arc<RouteNotificationOperation>,
    pipeline: Arc<RecordSyncOperation>,
}

impl NotificationComposition {
    /// Builds and wires the graph for `notification`.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        store: Arc<LocalStore>,
        registry: Arc<EntityRegistry>,
        notification: RemoteNotification,
        config: &SyncConfig,
    ) -> Self {
        let route = RouteNotificationOperation::new(
            Arc::clone(&context),
            Arc::clone(&store),
            Arc::clone(&registry),
            notification,
            config,
        );
        let pipeline =
            RecordSyncOperation::new(route.scope(), context, remote, store, registry, config);

        link_transform(&route, &pipeline, |route, pipeline| {
            route.with_pending(|gathered| {
                pipeline.with_pending(|pending| pending.extend_from(gathered));
            });
        });

        NotificationComposition { route, pipeline }
    }

    /// The graph's entry task.
    pub fn first(&self) -> TaskHandle {
        Arc::clone(&self.route) as TaskHandle
    }

    /// The graph's final task.
    pub fn last(&self) -> TaskHandle {
        Arc::clone(&self.pipeline) as TaskHandle
    }
}
