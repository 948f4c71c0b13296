#![forbid(unsafe_code)]
//! markovdb-txn: local transaction life-cycle and site coordination.
//!
//! [`LocalTransaction`] tracks rounds, output dependencies, and blocked work
//! units for one transaction; [`SiteContext`] admits invocations using the
//! transaction estimator, drives rounds through the [`ExecutionEngine`], and
//! runs PREPARE for multi-partition transactions.
//!
//! [`ExecutionEngine`]: markovdb_core::engine::ExecutionEngine

pub mod dependency;
pub mod error;
pub mod failpoints;
pub mod fragment;
pub mod latch;
pub mod local;
pub mod metrics;
pub mod prepare;
pub mod round;
pub mod site;

pub use dependency::DependencyInfo;
pub use error::{Result, TxnError};
pub use fragment::{Fragment, FragmentTaskMessage};
pub use latch::CountDownLatch;
pub use local::{LocalTransaction, Prediction, TxnInit};
pub use prepare::{PrepareCallback, PrepareOutcome};
pub use round::RoundState;
pub use site::{ClientResponse, SiteContext};
