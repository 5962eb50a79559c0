//! Weir Core - Shared abstractions for the weir connection pool
//!
//! This crate provides the fundamental traits and types the pooling
//! crates depend on. It defines:
//!
//! - `Connection` - Trait for pooled connections
//! - `ConnectionSource` - Trait for connection factories
//! - `ContextId` - Identity of one execution context in a pool group
//! - `WeirError` / `Result` - Common error handling

mod connection;
mod error;

pub use connection::*;
pub use error::*;
