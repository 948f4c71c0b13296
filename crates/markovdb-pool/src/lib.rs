#![forbid(unsafe_code)]
//! markovdb-pool: typed object pools for hot-path reuse.
//!
//! Estimators, estimates, dependency records, and PREPARE callbacks are
//! borrowed per transaction and handed back when the transaction finishes.
//! Every borrow is a [`Pooled`] handle; dropping it finishes the object and
//! returns it to the pool's free list (panic-safe, error paths included).

pub mod error;
pub mod pool;
pub mod tracking;

pub use error::{Error, Result};
pub use pool::{ObjectPool, PoolStats, Poolable, Pooled};
pub use tracking::PeakTracker;
