//! Tunables for caching, fetching and status polling.
//!
//! Defaults are the values the network's reference clients settled on. They
//! are starting points, not invariants; hosts with tighter UX needs lower the
//! retry budgets.

use std::time::Duration;

use crate::error::{ResourceError, Result};

pub const DEFAULT_RESOURCE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SEARCH_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_PUBLISH_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TOMBSTONE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TEMPORARY_TTL: Duration = Duration::from_secs(5 * 60);

/// Resources at or above this size are never listed or warmed.
pub const DEFAULT_MAX_RESOURCE_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    pub resource_ttl: Duration,
    pub search_ttl: Duration,
    pub publish_ttl: Duration,
    pub tombstone_ttl: Duration,
    pub temporary_ttl: Duration,
    /// Entries older than this are dropped when restoring the persisted
    /// publish cache.
    pub publish_persist_window: Duration,
    /// Upper bound on resource-cache entries; least recently used go first.
    pub resource_cache_capacity: usize,

    pub primary_concurrency: usize,
    pub backup_concurrency: usize,
    pub status_concurrency: usize,

    pub body_retry_delay: Duration,
    pub body_retry_attempts: u32,
    pub max_resource_size: u64,
    /// Timeout handed to the bridge for bulk publishes (deletes).
    pub publish_timeout: Duration,

    pub poll: PollConfig,
}

/// Status polling cadence and stall detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    /// Starting value of the stagnation counter.
    pub stagnation_budget: i32,
    /// Amount taken off the counter per tick without progress.
    pub stagnation_step: i32,
    /// Pause before the forced rebuild after a stall.
    pub refetch_delay: Duration,
    /// Status checks allowed before giving up with `FAILED_TO_DOWNLOAD`.
    pub retry_attempts: u32,
}

impl PollConfig {
    /// Cadence for resolvers tied to a consumer's lifetime.
    pub fn scoped() -> Self {
        Self {
            interval: Duration::from_secs(5),
            stagnation_budget: 24,
            stagnation_step: 5,
            refetch_delay: Duration::from_secs(25),
            retry_attempts: 200,
        }
    }

    /// Cadence for app-wide background downloads.
    pub fn global() -> Self {
        Self {
            refetch_delay: Duration::from_secs(10),
            ..Self::scoped()
        }
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_refetch_delay(mut self, delay: Duration) -> Self {
        self.refetch_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(ResourceError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        if self.stagnation_budget <= 0 || self.stagnation_step <= 0 {
            return Err(ResourceError::Config(
                "stagnation budget and step must be positive".to_string(),
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ResourceError::Config(
                "poll retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::scoped()
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            resource_ttl: DEFAULT_RESOURCE_TTL,
            search_ttl: DEFAULT_SEARCH_TTL,
            publish_ttl: DEFAULT_PUBLISH_TTL,
            tombstone_ttl: DEFAULT_TOMBSTONE_TTL,
            temporary_ttl: DEFAULT_TEMPORARY_TTL,
            publish_persist_window: DEFAULT_PUBLISH_TTL,
            resource_cache_capacity: 2048,
            primary_concurrency: 5,
            backup_concurrency: 2,
            status_concurrency: 5,
            body_retry_delay: Duration::from_secs(10),
            body_retry_attempts: 2,
            max_resource_size: DEFAULT_MAX_RESOURCE_SIZE,
            publish_timeout: Duration::from_secs(5 * 60),
            poll: PollConfig::scoped(),
        }
    }
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_ttl(mut self, ttl: Duration) -> Self {
        self.resource_ttl = ttl;
        self
    }

    pub fn with_search_ttl(mut self, ttl: Duration) -> Self {
        self.search_ttl = ttl;
        self
    }

    pub fn with_tombstone_ttl(mut self, ttl: Duration) -> Self {
        self.tombstone_ttl = ttl;
        self
    }

    pub fn with_temporary_ttl(mut self, ttl: Duration) -> Self {
        self.temporary_ttl = ttl;
        self
    }

    pub fn with_resource_cache_capacity(mut self, capacity: usize) -> Self {
        self.resource_cache_capacity = capacity;
        self
    }

    pub fn with_concurrency(mut self, primary: usize, backup: usize, status: usize) -> Self {
        self.primary_concurrency = primary;
        self.backup_concurrency = backup;
        self.status_concurrency = status;
        self
    }

    pub fn with_body_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.body_retry_attempts = attempts;
        self.body_retry_delay = delay;
        self
    }

    pub fn with_max_resource_size(mut self, bytes: u64) -> Self {
        self.max_resource_size = bytes;
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary_concurrency == 0
            || self.backup_concurrency == 0
            || self.status_concurrency == 0
        {
            return Err(ResourceError::Config(
                "queue concurrency must be at least 1".to_string(),
            ));
        }
        if self.resource_cache_capacity == 0 {
            return Err(ResourceError::Config(
                "resource cache capacity must be at least 1".to_string(),
            ));
        }
        if self.max_resource_size == 0 {
            return Err(ResourceError::Config(
                "max resource size must be greater than zero".to_string(),
            ));
        }
        for (name, ttl) in [
            ("resource", self.resource_ttl),
            ("search", self.search_ttl),
            ("publish", self.publish_ttl),
            ("tombstone", self.tombstone_ttl),
            ("temporary", self.temporary_ttl),
        ] {
            if ttl.is_zero() {
                return Err(ResourceError::Config(format!(
                    "{} TTL must be greater than zero",
                    name
                )));
            }
        }
        self.poll.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResourceConfig::default();
        assert_eq!(config.resource_ttl, Duration::from_secs(1800));
        assert_eq!(config.search_ttl, Duration::from_secs(300));
        assert_eq!(config.primary_concurrency, 5);
        assert_eq!(config.backup_concurrency, 2);
        assert_eq!(config.body_retry_attempts, 2);
        assert_eq!(config.max_resource_size, 5_242_880);
        assert_eq!(config.poll.retry_attempts, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_global_poll_refetches_sooner() {
        assert_eq!(PollConfig::scoped().refetch_delay, Duration::from_secs(25));
        assert_eq!(PollConfig::global().refetch_delay, Duration::from_secs(10));
        assert_eq!(PollConfig::global().interval, PollConfig::scoped().interval);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ResourceConfig::default()
            .with_concurrency(0, 2, 5)
            .validate()
            .is_err());
        assert!(ResourceConfig::default()
            .with_search_ttl(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ResourceConfig::default()
            .with_poll(PollConfig::scoped().with_retry_attempts(0))
            .validate()
            .is_err());
    }
}
