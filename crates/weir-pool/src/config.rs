//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a connection pool
///
/// Controls per-context capacity and the acquisition timeout. In a sharded
/// pool the same configuration applies to every shard in the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections per execution context
    max_connections_per_context: usize,
    /// Timeout in milliseconds when waiting for a connection to be released
    acquire_timeout_ms: u64,
}

impl PoolConfig {
    /// Create a new pool configuration with the given per-context capacity
    ///
    /// # Panics
    ///
    /// Panics if `max_connections_per_context` is 0.
    pub fn new(max_connections_per_context: usize) -> Self {
        assert!(
            max_connections_per_context > 0,
            "max_connections_per_context must be greater than 0"
        );

        Self {
            max_connections_per_context,
            acquire_timeout_ms: 10_000, // 10 seconds default
        }
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    /// Get the maximum number of connections per execution context
    pub fn max_connections_per_context(&self) -> usize {
        self.max_connections_per_context
    }

    /// Get the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolConfig {
    /// Create a default pool configuration
    ///
    /// Defaults:
    /// - max_connections_per_context: 1
    /// - acquire_timeout: 10 seconds
    fn default() -> Self {
        Self::new(1)
    }
}
