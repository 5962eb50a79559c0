//! Tests for sharded pool functionality

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use weir_core::{Connection, ConnectionSource, ContextId, Result, WeirError};

use super::pool::ShardedPool;
use crate::config::PoolConfig;

/// Mock connection for testing
struct MockConnection {
    ctx: ContextId,
    closed: AtomicBool,
    fail_close: bool,
}

impl MockConnection {
    fn new(ctx: ContextId) -> Self {
        Self {
            ctx,
            closed: AtomicBool::new(false),
            fail_close: false,
        }
    }

    fn with_failing_close(ctx: ContextId) -> Self {
        Self {
            ctx,
            closed: AtomicBool::new(false),
            fail_close: true,
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn context(&self) -> ContextId {
        self.ctx
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.fail_close {
            return Err(WeirError::source("close refused"));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Mock source that counts connections created
struct MockSource {
    counter: AtomicUsize,
    fail_close: bool,
}

impl MockSource {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            fail_close: false,
        }
    }

    fn with_failing_close() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            fail_close: true,
        }
    }

    fn created(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionSource for MockSource {
    async fn connect(&self, ctx: ContextId) -> Result<Arc<dyn Connection>> {
        self.counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Ok(Arc::new(MockConnection::with_failing_close(ctx)))
        } else {
            Ok(Arc::new(MockConnection::new(ctx)))
        }
    }
}

fn group(contexts: usize, source: Arc<MockSource>) -> ShardedPool {
    let config = PoolConfig::new(1).with_acquire_timeout_ms(5000);
    ShardedPool::new(contexts, config, source)
}

#[tokio::test]
async fn test_group_lists_contexts() {
    let pool = group(4, Arc::new(MockSource::new()));
    let contexts = pool.contexts();
    assert_eq!(contexts.len(), 4);
    assert_eq!(contexts[0], ContextId::new(0));
    assert_eq!(contexts[3], ContextId::new(3));
}

#[tokio::test]
async fn test_acquire_round_robin() {
    let source = Arc::new(MockSource::new());
    let pool = group(3, source.clone());

    let a = pool.acquire().await.expect("acquire");
    let b = pool.acquire().await.expect("acquire");
    let c = pool.acquire().await.expect("acquire");

    assert_eq!(a.context(), ContextId::new(0));
    assert_eq!(b.context(), ContextId::new(1));
    assert_eq!(c.context(), ContextId::new(2));
    assert_eq!(source.created(), 3);
}

#[tokio::test]
async fn test_acquire_on_preferred_context() {
    let source = Arc::new(MockSource::new());
    let pool = group(3, source.clone());

    let conn = pool.acquire_on(ContextId::new(2)).await.expect("acquire");
    assert_eq!(conn.context(), ContextId::new(2));
}

#[tokio::test]
async fn test_acquire_on_unknown_context() {
    let pool = group(2, Arc::new(MockSource::new()));

    let result = pool.acquire_on(ContextId::new(7)).await;
    assert!(matches!(
        result,
        Err(WeirError::UnknownContext(ctx)) if ctx == ContextId::new(7)
    ));
}

#[tokio::test]
async fn test_guard_returns_connection_on_drop() {
    let source = Arc::new(MockSource::new());
    let pool = group(1, source.clone());

    {
        let conn = pool.acquire().await.expect("acquire");
        assert!(!conn.is_closed());
    }

    // The dropped guard went back to its shard and is reused.
    let _conn = pool.acquire().await.expect("acquire again");
    assert_eq!(source.created(), 1);
}

#[tokio::test]
async fn test_release_routes_to_owning_shard() {
    let source = Arc::new(MockSource::new());
    let pool = group(2, source.clone());

    let conn = pool
        .acquire_on(ContextId::new(1))
        .await
        .expect("acquire")
        .into_inner();
    assert_eq!(source.created(), 1);

    // Hand the detached connection back; it must land on shard 1.
    pool.release(conn);
    let again = pool.acquire_on(ContextId::new(1)).await.expect("reacquire");
    assert_eq!(again.context(), ContextId::new(1));
    assert_eq!(source.created(), 1);

    let other = pool.acquire_on(ContextId::new(0)).await.expect("acquire");
    assert_eq!(other.context(), ContextId::new(0));
    assert_eq!(source.created(), 2);
}

#[tokio::test]
async fn test_stats_aggregate_over_shards() {
    let source = Arc::new(MockSource::new());
    let pool = group(2, source.clone());

    let _a = pool.acquire_on(ContextId::new(0)).await.expect("acquire");
    let _b = pool.acquire_on(ContextId::new(1)).await.expect("acquire");

    let stats = pool.stats().await;
    assert_eq!(stats.total(), 2);
    assert_eq!(stats.active(), 2);
    assert_eq!(stats.idle(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_idle_across_shards() {
    let source = Arc::new(MockSource::new());
    let pool = group(2, source.clone());

    let c0 = pool
        .acquire_on(ContextId::new(0))
        .await
        .expect("acquire")
        .into_inner();
    let c1 = pool
        .acquire_on(ContextId::new(1))
        .await
        .expect("acquire")
        .into_inner();
    let obs0 = Arc::clone(&c0);
    let obs1 = Arc::clone(&c1);
    pool.release(c0);
    pool.release(c1);

    pool.shutdown().await.expect("shutdown");
    assert!(obs0.is_closed());
    assert!(obs1.is_closed());
}

#[tokio::test]
async fn test_shutdown_twice_is_observable() {
    let pool = group(2, Arc::new(MockSource::new()));

    pool.shutdown().await.expect("first shutdown");
    let second = pool.shutdown().await;
    assert!(matches!(second, Err(WeirError::Shutdown)));
    assert!(pool.is_shutdown());
}

#[tokio::test]
async fn test_acquire_after_shutdown_fails_fast() {
    let pool = group(2, Arc::new(MockSource::new()));

    pool.shutdown().await.expect("shutdown");
    assert!(matches!(pool.acquire().await, Err(WeirError::Shutdown)));
    assert!(matches!(
        pool.acquire_on(ContextId::new(0)).await,
        Err(WeirError::Shutdown)
    ));
}

#[tokio::test]
async fn test_shutdown_reports_close_errors() {
    let source = Arc::new(MockSource::with_failing_close());
    let pool = group(1, source.clone());

    let conn = pool.acquire().await.expect("acquire").into_inner();
    pool.release(conn);

    let result = pool.shutdown().await;
    match result {
        Err(WeirError::Close { errors }) => assert_eq!(errors.len(), 1),
        Err(other) => panic!("expected aggregated close failure, got {other}"),
        Ok(()) => panic!("expected aggregated close failure"),
    }
}
