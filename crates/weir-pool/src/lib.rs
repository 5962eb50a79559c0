//! Weir Pool - Connection pooling sharded over execution contexts
//!
//! This crate provides the pooling and admission-control engine: a
//! single-context pool that owns connection lifecycle for one execution
//! context, and a sharded pool that fans out across a fixed group of
//! contexts while keeping each shard's state single-owner.
//!
//! # Example
//!
//! ```ignore
//! use weir_pool::{PoolConfig, ShardedPool};
//!
//! let config = PoolConfig::new(4).with_acquire_timeout_ms(5000);
//! let pool = ShardedPool::new(num_workers, config, source);
//!
//! let conn = pool.acquire().await?;
//! // Use connection...
//! // Connection returned to its owning shard on drop
//! ```

mod config;
pub mod context;
pub mod sharded;
mod stats;

pub use config::PoolConfig;
pub use context::ContextPool;
pub use sharded::{PooledConnection, ShardedPool};
pub use stats::PoolStats;
