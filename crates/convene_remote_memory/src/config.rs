//! Server configuration.

/// Default number of records returned per query page.
pub const DEFAULT_MAX_PAGE: usize = 100;

/// Default number of records one fetch or modify call may reference.
/// Matches the documented per-call limit of the real service.
pub const DEFAULT_BATCH_LIMIT: usize = 400;

/// Configuration for the in-memory remote service.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Maximum records returned per query page. Query calls may ask for
    /// less; asking for more is silently capped.
    pub max_page: usize,
    /// Maximum records one fetch or modify call may reference. Larger
    /// batches fail with a limit-exceeded condition, which is how the
    /// engine's batch-halving path gets exercised.
    pub batch_limit: usize,
}

impl RemoteConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            max_page: DEFAULT_MAX_PAGE,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Sets the maximum query page size.
    pub fn with_max_page(mut self, max_page: usize) -> Self {
        self.max_page = max_page;
        self
    }

    /// Sets the per-call record limit.
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = RemoteConfig::default();
        assert_eq!(config.max_page, DEFAULT_MAX_PAGE);
        assert_eq!(config.batch_limit, DEFAULT_BATCH_LIMIT);
    }

    #[test]
    fn config_builder() {
        let config = RemoteConfig::new().with_max_page(3).with_batch_limit(10);
        assert_eq!(config.max_page, 3);
        assert_eq!(config.batch_limit, 10);
    }
}
