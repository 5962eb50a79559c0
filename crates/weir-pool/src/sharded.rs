//! Sharded pooling across a group of execution contexts
//!
//! A [`ShardedPool`] presents the same acquire/release/shutdown contract as
//! a single [`ContextPool`](crate::ContextPool), with one fully independent
//! shard per context. Acquisitions without a preferred context are spread
//! round robin over the group; releases are routed to the shard that owns
//! the connection.

mod pool;

#[cfg(test)]
mod tests;

pub use pool::{PooledConnection, ShardedPool};
