//! Sharded pool implementation

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use weir_core::{Connection, ConnectionSource, ContextId, Result, WeirError};

use crate::config::PoolConfig;
use crate::context::ContextPool;
use crate::stats::PoolStats;

/// A connection pool sharded across a group of execution contexts
///
/// Each context in the group gets its own [`ContextPool`]; the shard table
/// is built once at construction and never changes, so lookups take no
/// lock. Only the group-wide shutdown flag is shared mutable state, because
/// shutdown may be invoked from any thread.
#[derive(Clone)]
pub struct ShardedPool {
    inner: Arc<ShardedInner>,
}

struct ShardedInner {
    shards: HashMap<ContextId, ContextPool>,
    contexts: Vec<ContextId>,
    next: AtomicUsize,
    is_shutdown: Mutex<bool>,
}

impl ShardedPool {
    /// Create a pool group with one shard per execution context
    ///
    /// # Panics
    ///
    /// Panics if `contexts` is 0.
    pub fn new(contexts: usize, config: PoolConfig, source: Arc<dyn ConnectionSource>) -> Self {
        assert!(contexts > 0, "a pool group needs at least one context");

        let ids: Vec<ContextId> = (0..contexts).map(ContextId::new).collect();
        let shards = ids
            .iter()
            .map(|&ctx| {
                (
                    ctx,
                    ContextPool::new(ctx, config.clone(), Arc::clone(&source)),
                )
            })
            .collect();

        Self {
            inner: Arc::new(ShardedInner {
                shards,
                contexts: ids,
                next: AtomicUsize::new(0),
                is_shutdown: Mutex::new(false),
            }),
        }
    }

    /// The execution contexts in this group
    pub fn contexts(&self) -> &[ContextId] {
        &self.inner.contexts
    }

    /// Whether the group has been shut down
    pub fn is_shutdown(&self) -> bool {
        *self.inner.is_shutdown.lock()
    }

    /// Acquire a connection from the next context in round-robin order
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if self.is_shutdown() {
            return Err(WeirError::Shutdown);
        }
        let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.contexts.len();
        self.acquire_from(self.inner.contexts[idx]).await
    }

    /// Acquire a connection bound to the given context
    pub async fn acquire_on(&self, ctx: ContextId) -> Result<PooledConnection> {
        if self.is_shutdown() {
            return Err(WeirError::Shutdown);
        }
        self.acquire_from(ctx).await
    }

    async fn acquire_from(&self, ctx: ContextId) -> Result<PooledConnection> {
        let shard = self
            .inner
            .shards
            .get(&ctx)
            .ok_or(WeirError::UnknownContext(ctx))?;
        let conn = shard.acquire().await?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.clone(),
        })
    }

    /// Return a connection to the shard that owns it
    ///
    /// Safe to call from any thread; the owning shard serializes the actual
    /// state change onto its own context. Releasing to any other shard
    /// would corrupt that shard's slot accounting, so the shard is always
    /// resolved from the connection itself.
    pub fn release(&self, conn: Arc<dyn Connection>) {
        let ctx = conn.context();
        match self.inner.shards.get(&ctx) {
            Some(shard) => shard.release(conn),
            None => {
                tracing::warn!(context = %ctx, "connection released from outside the group; closing it");
                tokio::spawn(async move {
                    let _ = conn.close().await;
                });
            }
        }
    }

    /// Shut down every shard in the group
    ///
    /// The first call closes all idle connections and fails all pending
    /// waiters; every shard is given a close attempt even if some fail, and
    /// failures are reported aggregated. Repeat calls fail with
    /// [`WeirError::Shutdown`] without touching connection state.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut is_shutdown = self.inner.is_shutdown.lock();
            if *is_shutdown {
                return Err(WeirError::Shutdown);
            }
            *is_shutdown = true;
        }

        tracing::info!(shards = self.inner.contexts.len(), "shutting down pool group");
        let results = join_all(self.inner.shards.values().map(|shard| shard.close())).await;
        let errors: Vec<WeirError> = results.into_iter().filter_map(|r| r.err()).collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WeirError::Close { errors })
        }
    }

    /// Statistics aggregated over every shard
    pub async fn stats(&self) -> PoolStats {
        let snapshots = join_all(self.inner.shards.values().map(|shard| shard.stats())).await;
        snapshots
            .into_iter()
            .fold(PoolStats::default(), PoolStats::merge)
    }
}

impl std::fmt::Debug for ShardedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedPool")
            .field("contexts", &self.inner.contexts.len())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

/// A connection checked out of a [`ShardedPool`]
///
/// Dereferences to the underlying connection and returns it to the owning
/// shard when dropped.
pub struct PooledConnection {
    conn: Option<Arc<dyn Connection>>,
    pool: ShardedPool,
}

impl PooledConnection {
    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn Connection> {
        self.conn.as_ref().expect("connection taken")
    }

    /// Detach the connection from the guard
    ///
    /// The caller becomes responsible for handing the connection back via
    /// [`ShardedPool::release`].
    pub fn into_inner(mut self) -> Arc<dyn Connection> {
        self.conn.take().expect("connection taken")
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken").as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
