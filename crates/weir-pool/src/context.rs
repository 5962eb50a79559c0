//! Single-context pooling
//!
//! A [`ContextPool`] owns connection lifecycle for exactly one execution
//! context: the idle set, the slot count, the waiter queue, and the shutdown
//! flag. All of that state lives in one task and is mutated only there, so
//! the pool needs no locks of its own.

mod pool;


pub use pool::ContextPool;
