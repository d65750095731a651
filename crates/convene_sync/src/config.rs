//! Engine configuration.

use crate::error::{SyncError, SyncResult};
use crate::queue::QueueLimits;

/// Default cap on records per remote modify or fetch batch.
pub const DEFAULT_MAX_BATCH: usize = 400;

/// Default identifier for the shared-event subscription.
pub const DEFAULT_SUBSCRIPTION_ID: &str = "convene-shared-events";

/// Tunables for a [`SyncManager`](crate::SyncManager).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on records per remote batch. Halved (down to 1) when the
    /// remote reports the batch was too large.
    pub max_batch: usize,
    /// Identifier of the subscription covering followed users' events.
    pub subscription_id: String,
    /// Per-tier concurrency limits for the work queue.
    pub queue_limits: QueueLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_batch: DEFAULT_MAX_BATCH,
            subscription_id: DEFAULT_SUBSCRIPTION_ID.to_string(),
            queue_limits: QueueLimits::default(),
        }
    }
}

impl SyncConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        SyncConfig::default()
    }

    /// Overrides the batch cap.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Overrides the subscription identifier.
    pub fn with_subscription_id(mut self, id: impl Into<String>) -> Self {
        self.subscription_id = id.into();
        self
    }

    /// Overrides the queue limits.
    pub fn with_queue_limits(mut self, limits: QueueLimits) -> Self {
        self.queue_limits = limits;
        self
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.max_batch == 0 {
            return Err(SyncError::internal_inconsistency(
                "max_batch must be at least 1",
            ));
        }
        if self.subscription_id.is_empty() {
            return Err(SyncError::internal_inconsistency(
                "subscription_id must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_batch_is_rejected() {
        let config = SyncConfig::new().with_max_batch(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_subscription_id_is_rejected() {
        let config = SyncConfig::new().with_subscription_id("");
        assert!(config.validate().is_err());
    }
}
