//! Single-context pool implementation

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use weir_core::{Connection, ConnectionSource, ContextId, Result, WeirError};

use crate::config::PoolConfig;
use crate::stats::PoolStats;

/// A connection pool bound to a single execution context
///
/// Every public operation forwards a command into the channel consumed by
/// the pool's task, so operations invoked from any thread are serialized
/// onto the owning context before they touch pool state. Acquisition either
/// hands out an idle connection, kicks off creation of a new one while
/// capacity remains, or parks the caller as a FIFO waiter with a timeout.
///
/// Cloning the handle is cheap; all clones drive the same pool.
#[derive(Clone)]
pub struct ContextPool {
    ctx: ContextId,
    commands: mpsc::UnboundedSender<Command>,
}

impl ContextPool {
    /// Create a new pool for the given execution context
    ///
    /// Spawns the task that owns the pool's state. Connections are created
    /// on demand through `source`, up to the configured per-context limit.
    pub fn new(ctx: ContextId, config: PoolConfig, source: Arc<dyn ConnectionSource>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = PoolTask {
            ctx,
            config,
            source,
            commands: tx.downgrade(),
            idle: VecDeque::new(),
            active: 0,
            waiters: VecDeque::new(),
            next_waiter_id: 0,
            is_shutdown: false,
        };
        tokio::spawn(task.run(rx));

        Self { ctx, commands: tx }
    }

    /// The execution context this pool belongs to
    pub fn context(&self) -> ContextId {
        self.ctx
    }

    /// Acquire a connection
    ///
    /// This will:
    /// 1. Return an idle connection, discarding any that were closed behind
    ///    the pool's back
    /// 2. If none is available and a slot is free, create a new connection
    /// 3. Otherwise wait until a connection is released, bounded by the
    ///    configured acquire timeout
    pub async fn acquire(&self) -> Result<Arc<dyn Connection>> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Acquire(Pending::new(reply)))
            .is_err()
        {
            return Err(WeirError::Shutdown);
        }
        rx.await.map_err(|_| WeirError::Shutdown)?
    }

    /// Return a connection to the pool
    ///
    /// If a waiter is queued, the oldest one is served next, through the
    /// same admission path a fresh acquisition takes. After shutdown the
    /// connection is closed instead of pooled.
    pub fn release(&self, conn: Arc<dyn Connection>) {
        if self.commands.send(Command::Release(conn)).is_err() {
            tracing::warn!(context = %self.ctx, "released connection after pool task ended");
        }
    }

    /// Shut down the pool
    ///
    /// Closes every idle connection, then fails all pending waiters with
    /// [`WeirError::Shutdown`]. Checked-out connections are closed lazily
    /// when they are released. A second call fails with
    /// [`WeirError::Shutdown`] without touching connection state.
    pub async fn close(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).is_err() {
            return Err(WeirError::Shutdown);
        }
        rx.await.map_err(|_| WeirError::Shutdown)?
    }

    /// Get current pool statistics
    pub async fn stats(&self) -> PoolStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats(reply)).is_err() {
            return PoolStats::default();
        }
        rx.await.unwrap_or_default()
    }
}

enum Command {
    Acquire(Pending),
    Release(Arc<dyn Connection>),
    Created {
        result: Result<Arc<dyn Connection>>,
        pending: Pending,
    },
    WaiterTimeout(u64),
    Close(oneshot::Sender<Result<()>>),
    Stats(oneshot::Sender<PoolStats>),
}

/// An acquisition awaiting completion
///
/// Completed exactly once; completion by any path aborts the timeout timer
/// if one was armed.
struct Pending {
    reply: oneshot::Sender<Result<Arc<dyn Connection>>>,
    timer: Option<AbortHandle>,
}

impl Pending {
    fn new(reply: oneshot::Sender<Result<Arc<dyn Connection>>>) -> Self {
        Self { reply, timer: None }
    }

    /// Whether the caller stopped waiting for the result.
    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Drop the pending request without a result, aborting its timer.
    fn cancel(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }

    /// Complete the acquisition
    ///
    /// Returns the connection back if the caller has gone away and can no
    /// longer receive it, so the pool can reclaim it.
    fn complete(self, result: Result<Arc<dyn Connection>>) -> Option<Arc<dyn Connection>> {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        match self.reply.send(result) {
            Ok(()) => None,
            Err(Ok(conn)) => Some(conn),
            Err(Err(_)) => None,
        }
    }
}

struct Waiter {
    id: u64,
    pending: Pending,
}

/// State owned by the pool task
///
/// Invariants, holding at every command boundary:
/// - `idle.len() <= active <= config.max_connections_per_context()`
/// - if `waiters` is non-empty, `idle` is empty and `active` equals the
///   per-context limit
struct PoolTask {
    ctx: ContextId,
    config: PoolConfig,
    source: Arc<dyn ConnectionSource>,
    commands: mpsc::WeakUnboundedSender<Command>,
    idle: VecDeque<Arc<dyn Connection>>,
    active: usize,
    waiters: VecDeque<Waiter>,
    next_waiter_id: u64,
    is_shutdown: bool,
}

impl PoolTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Acquire(pending) => self.admit(pending),
                Command::Release(conn) => self.handle_release(conn),
                Command::Created { result, pending } => self.handle_created(result, pending),
                Command::WaiterTimeout(id) => self.handle_waiter_timeout(id),
                Command::Close(reply) => self.handle_close(reply),
                Command::Stats(reply) => self.handle_stats(reply),
            }
        }

        // Every handle is gone; release whatever was left behind.
        for waiter in self.waiters.drain(..) {
            waiter.pending.cancel();
        }
        for conn in self.idle.drain(..) {
            tokio::spawn(async move {
                let _ = conn.close().await;
            });
        }
    }

    /// The full admission path, shared by fresh acquisitions and waiters
    /// being re-admitted on release.
    fn admit(&mut self, pending: Pending) {
        if self.is_shutdown {
            pending.complete(Err(WeirError::Shutdown));
            return;
        }

        // Pop idle connections, discarding any closed behind the pool's
        // back. A pruned connection vacates its slot but does not itself
        // trigger creation of a replacement.
        while let Some(conn) = self.idle.pop_front() {
            if conn.is_closed() {
                self.active -= 1;
                tracing::debug!(context = %self.ctx, "pruned closed connection from idle set");
                continue;
            }
            if let Some(conn) = pending.complete(Ok(conn)) {
                self.handle_release(conn);
            }
            return;
        }

        if self.active < self.config.max_connections_per_context() {
            // Reserve the slot before the asynchronous creation completes.
            self.active += 1;
            self.spawn_create(pending);
            return;
        }

        self.park(pending);
    }

    /// Queue an acquisition behind the connections currently checked out.
    fn park(&mut self, mut pending: Pending) {
        if let Some(timer) = pending.timer.take() {
            timer.abort();
        }

        let id = self.next_waiter_id;
        self.next_waiter_id += 1;

        let timeout = self.config.acquire_timeout();
        let commands = self.commands.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::WaiterTimeout(id));
            }
        });
        pending.timer = Some(timer.abort_handle());

        tracing::debug!(context = %self.ctx, waiter = id, "waiting for a connection to be released");
        self.waiters.push_back(Waiter { id, pending });
    }

    /// Create a new connection off the pool task and feed the result back
    /// in as a command, so the context is never blocked on the source.
    fn spawn_create(&self, pending: Pending) {
        let source = Arc::clone(&self.source);
        let ctx = self.ctx;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = source.connect(ctx).await;
            let Some(commands) = commands.upgrade() else {
                if let Ok(conn) = result {
                    let _ = conn.close().await;
                }
                return;
            };
            if let Err(err) = commands.send(Command::Created { result, pending }) {
                if let Command::Created {
                    result: Ok(conn), ..
                } = err.0
                {
                    let _ = conn.close().await;
                }
            }
        });
    }

    fn handle_created(&mut self, result: Result<Arc<dyn Connection>>, pending: Pending) {
        match result {
            Ok(conn) => {
                // Admitted before shutdown, so delivered even if shutdown
                // has begun since; the connection is closed at release.
                if let Some(conn) = pending.complete(Ok(conn)) {
                    self.handle_release(conn);
                }
            }
            Err(err) => {
                tracing::debug!(context = %self.ctx, error = %err, "connection creation failed");
                if !self.is_shutdown {
                    // Release the reservation so one failed creation cannot
                    // starve the pool, then hand the vacated slot to the
                    // oldest waiter.
                    self.active -= 1;
                    pending.complete(Err(err));
                    self.admit_next_waiter();
                } else {
                    pending.complete(Err(err));
                }
            }
        }
    }

    fn handle_release(&mut self, conn: Arc<dyn Connection>) {
        if self.is_shutdown {
            tokio::spawn(async move {
                let _ = conn.close().await;
            });
            return;
        }

        self.idle.push_back(conn);
        self.admit_next_waiter();
    }

    /// Re-run admission for the oldest waiter still being awaited.
    fn admit_next_waiter(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            if waiter.pending.is_abandoned() {
                waiter.pending.cancel();
                continue;
            }
            self.admit(waiter.pending);
            return;
        }
    }

    fn handle_waiter_timeout(&mut self, id: u64) {
        // The waiter may already have been served by a release.
        let Some(pos) = self.waiters.iter().position(|w| w.id == id) else {
            return;
        };
        if let Some(waiter) = self.waiters.remove(pos) {
            let timeout = self.config.acquire_timeout();
            tracing::debug!(context = %self.ctx, waiter = id, "acquisition timed out");
            waiter.pending.complete(Err(WeirError::AcquireTimeout { timeout }));
        }
    }

    fn handle_close(&mut self, reply: oneshot::Sender<Result<()>>) {
        if self.is_shutdown {
            let _ = reply.send(Err(WeirError::Shutdown));
            return;
        }
        self.is_shutdown = true;

        let idle = mem::take(&mut self.idle);
        let waiters = mem::take(&mut self.waiters);
        self.active -= idle.len();

        tracing::info!(
            context = %self.ctx,
            idle = idle.len(),
            waiters = waiters.len(),
            checked_out = self.active,
            "closing context pool"
        );

        tokio::spawn(async move {
            let results = join_all(idle.into_iter().map(|conn| async move {
                conn.close().await
            }))
            .await;
            let errors: Vec<WeirError> = results.into_iter().filter_map(|r| r.err()).collect();

            // Waiters fail only once every idle connection had its close
            // attempt.
            for waiter in waiters {
                waiter.pending.complete(Err(WeirError::Shutdown));
            }

            let result = if errors.is_empty() {
                Ok(())
            } else {
                tracing::warn!(
                    failed = errors.len(),
                    "connections failed to close during shutdown"
                );
                Err(WeirError::Close { errors })
            };
            let _ = reply.send(result);
        });
    }

    fn handle_stats(&self, reply: oneshot::Sender<PoolStats>) {
        let stats = PoolStats::new(
            self.active,
            self.idle.len(),
            self.active - self.idle.len(),
            self.waiters.len(),
        );
        let _ = reply.send(stats);
    }
}
