//! Host-supplied tunables.
//!
//! The core never reads environment variables or config files itself —
//! per spec.md §6, the embedding host decides how to surface these. This
//! module only fixes sane defaults and a small builder, the same shape as
//! the teacher's `ListParams`/`Config` builders.

use std::time::Duration;

/// Tunables for a [`crate::service::Resolver`] instance.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Number of worker tasks draining the lookup queue (`W`).
    pub workers: usize,
    /// Bounded queue capacity (`Q`).
    pub queue_capacity: usize,
    /// Time-to-live for cache entries before background eviction.
    pub cache_ttl: Duration,
    /// Per-job deadline applied to backend calls.
    pub job_timeout: Duration,
    /// Interval between background TTL eviction sweeps.
    pub eviction_interval: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            queue_capacity: 100,
            cache_ttl: Duration::from_secs(300),
            job_timeout: Duration::from_secs(30),
            eviction_interval: Duration::from_secs(30),
        }
    }
}

impl ResolverConfig {
    /// Start from defaults.
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder(Self::default())
    }
}

/// Builder for [`ResolverConfig`]. Each setter returns `self` so calls
/// chain, matching `kube::Config`'s own builder conventions.
#[derive(Debug, Clone)]
pub struct ResolverConfigBuilder(ResolverConfig);

impl ResolverConfigBuilder {
    /// Set the worker count (`W`).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.0.workers = workers;
        self
    }

    /// Set the queue capacity (`Q`).
    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.0.queue_capacity = queue_capacity;
        self
    }

    /// Set the cache entry TTL.
    #[must_use]
    pub fn cache_ttl(mut self, cache_ttl: Duration) -> Self {
        self.0.cache_ttl = cache_ttl;
        self
    }

    /// Set the per-job backend deadline.
    #[must_use]
    pub fn job_timeout(mut self, job_timeout: Duration) -> Self {
        self.0.job_timeout = job_timeout;
        self
    }

    /// Set the background eviction sweep interval.
    #[must_use]
    pub fn eviction_interval(mut self, eviction_interval: Duration) -> Self {
        self.0.eviction_interval = eviction_interval;
        self
    }

    /// Finish building.
    pub fn build(self) -> ResolverConfig {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ResolverConfig::default();
        assert_eq!(config.workers, 10);
        assert_eq!(config.queue_capacity, 100);
    }

    #[test]
    fn builder_overrides_only_requested_fields() {
        let config = ResolverConfig::builder().workers(1).queue_capacity(2).build();
        assert_eq!(config.workers, 1);
        assert_eq!(config.queue_capacity, 2);
        assert_eq!(config.job_timeout, ResolverConfig::default().job_timeout);
    }
}
