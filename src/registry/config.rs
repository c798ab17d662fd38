//! Registry configuration

use std::time::Duration;

use crate::protocol::DEFAULT_BUFFER_CAPACITY;

/// `tokio::time::interval` panics on a zero period
pub(crate) const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the client registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Sentences held per consumer before the oldest are dropped
    pub buffer_capacity: usize,

    /// Remove entries with no attached reader after this much inactivity
    ///
    /// `None` (the default) keeps every entry for the life of the process.
    pub idle_eviction: Option<Duration>,

    /// How often the eviction task runs
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            idle_eviction: None,
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the per-consumer buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    /// Enable eviction of idle, unattached entries
    pub fn idle_eviction(mut self, timeout: Duration) -> Self {
        self.idle_eviction = Some(timeout);
        self
    }

    /// Set the eviction task interval (at least one millisecond)
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(MIN_CLEANUP_INTERVAL);
        self
    }
}
