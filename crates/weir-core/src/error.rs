//! Error types for weir

use std::time::Duration;

use thiserror::Error;

use crate::connection::ContextId;

/// Boxed error carried for failures that originate outside the pool.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for weir operations
#[derive(Error, Debug)]
pub enum WeirError {
    /// The pool (or pool group) has been shut down.
    ///
    /// Raised for acquisitions attempted after shutdown, for waiters still
    /// pending when shutdown begins, and for a repeated shutdown call.
    #[error("connection pool is shut down")]
    Shutdown,

    /// A queued acquisition was not serviced before its deadline.
    #[error("timed out after {timeout:?} waiting for a pooled connection")]
    AcquireTimeout {
        /// The configured acquisition timeout that elapsed.
        timeout: Duration,
    },

    /// The connection source failed to produce a connection.
    #[error("connection source error: {0}")]
    Source(#[source] BoxError),

    /// One or more connections failed to close during shutdown.
    ///
    /// Failures are collected; closing the remaining connections is never
    /// aborted by an individual failure.
    #[error("{} connection(s) failed to close during shutdown", .errors.len())]
    Close { errors: Vec<WeirError> },

    /// The requested execution context is not part of this pool group.
    #[error("unknown execution context: {0}")]
    UnknownContext(ContextId),
}

impl WeirError {
    /// Wrap an external failure as a connection-source error.
    pub fn source(err: impl Into<BoxError>) -> Self {
        Self::Source(err.into())
    }
}

/// Result type alias for weir operations
pub type Result<T> = std::result::Result<T, WeirError>;
