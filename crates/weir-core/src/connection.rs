//! Connection and connection-source traits

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Identity of one execution context in a pool group.
///
/// A context is an independent execution lane: all pool state belonging to
/// it is mutated from a single task, and a connection stays bound to the
/// context it was created on for its whole life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(usize);

impl ContextId {
    /// Create a context identity from its index within the group.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The index of this context within its group.
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

/// A pooled connection
///
/// The pool needs exactly three capabilities from a connection: which
/// context owns it, whether it has been closed, and a way to close it.
/// Everything else (wire protocol, transport, authentication) lives in the
/// implementing type.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The execution context this connection was created on.
    fn context(&self) -> ContextId;

    /// Check if the connection is closed.
    ///
    /// A connection may be closed from outside the pool at any time. The
    /// pool discovers this lazily, at the next acquisition that pops the
    /// connection from the idle set or at shutdown.
    fn is_closed(&self) -> bool;

    /// Close the connection.
    ///
    /// Must be safe to call on an already-closed connection.
    async fn close(&self) -> Result<()>;
}

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    /// Create a new connection bound to the given context.
    ///
    /// Must not block. The returned connection reports `ctx` from
    /// [`Connection::context`].
    async fn connect(&self, ctx: ContextId) -> Result<Arc<dyn Connection>>;
}

#[async_trait]
impl<S: ConnectionSource> ConnectionSource for Arc<S> {
    async fn connect(&self, ctx: ContextId) -> Result<Arc<dyn Connection>> {
        (**self).connect(ctx).await
    }
}
