//! Keeping the shared-event push subscription in step with the friend list.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use convene_records::{
    normalized_identity, RecordId, Scope, Subscription, SyncOptions, EVENT_RECORD_TYPE,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::context::WorkflowContext;
use crate::service::RemoteService;
use crate::settings::SettingsStore;
use crate::task::{TaskMeta, WorkflowTask};

/// Registers (or rewrites) the query subscription that pushes shared-event
/// changes for the current owner set, and removes stale event subscriptions
/// left behind by older installs.
///
/// The remote is only contacted when the owner set differs from the one the
/// settings recorded after the last successful update; a full sync skips
/// that shortcut and re-verifies the subscription on the server.
pub struct UpdateSubscriptionOperation {
    meta: TaskMeta,
    remote: Arc<dyn RemoteService>,
    settings: Arc<dyn SettingsStore>,
    subscription_id: String,
    options: SyncOptions,
    owners: Mutex<Vec<RecordId>>,
}

impl UpdateSubscriptionOperation {
    /// Creates the operation.
    pub fn new(
        context: Arc<WorkflowContext>,
        remote: Arc<dyn RemoteService>,
        settings: Arc<dyn SettingsStore>,
        config: &SyncConfig,
        options: SyncOptions,
    ) -> Arc<Self> {
        Arc::new(UpdateSubscriptionOperation {
            meta: TaskMeta::new("subscription.update", context),
            remote,
            settings,
            subscription_id: config.subscription_id.clone(),
            options,
            owners: Mutex::new(Vec::new()),
        })
    }

    /// Supplies the owners the subscription should cover, usually linked
    /// from a [`UsersWithFriendsOperation`](super::UsersWithFriendsOperation).
    pub fn set_owners(&self, owners: Vec<RecordId>) {
        *self.owners.lock() = owners;
    }

    async fn update(&self) -> crate::error::SyncResult<()> {
        let owners = self.owners.lock().clone();
        let normalized: BTreeSet<String> = owners.iter().map(normalized_identity).collect();
        // A full sync re-verifies the subscription server-side even when the
        // owner set looks unchanged.
        if !self.options.is_full_sync() && normalized == self.settings.subscribed_users() {
            debug!("subscription already covers the owner set");
            return Ok(());
        }

        let existing = self.remote.fetch_subscriptions(Scope::Public).await?;
        let mut ours = None;
        for subscription in existing {
            if subscription.id == self.subscription_id {
                ours = Some(subscription);
            } else if subscription.record_type == EVENT_RECORD_TYPE {
                info!(id = %subscription.id, "removing stale event subscription");
                self.remote
                    .delete_subscription(Scope::Public, &subscription.id)
                    .await?;
            }
        }

        if owners.is_empty() {
            if ours.is_some() {
                info!("no event owners left, removing the subscription");
                self.remote
                    .delete_subscription(Scope::Public, &self.subscription_id)
                    .await?;
            }
        } else if !ours.is_some_and(|sub| sub.covers_same_owners(&owners)) {
            info!(owners = owners.len(), "rewriting the event subscription");
            let subscription =
                Subscription::new(self.subscription_id.clone(), EVENT_RECORD_TYPE, owners);
            self.remote
                .save_subscription(Scope::Public, subscription)
                .await?;
        }
        self.settings.set_subscribed_users(normalized);
        Ok(())
    }
}

#[async_trait]
impl WorkflowTask for UpdateSubscriptionOperation {
    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self: Arc<Self>) {
        match self.update().await {
            Ok(()) => self.meta.finish(),
            Err(error) => self.meta.finish_with_error(error),
        }
    }
}
