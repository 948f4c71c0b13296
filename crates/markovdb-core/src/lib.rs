#![forbid(unsafe_code)]
//! markovdb-core: shared vocabulary of the markovdb control plane.
//!
//! Ids, catalog metadata, parameter values, transaction traces, parameter
//! correlations, site configuration, and stable hashing. The two external
//! collaborators (partition estimation and the fragment executor) are defined
//! here as traits only, so any crate can depend on the API without pulling an
//! implementation.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod hash;
pub mod id;
pub mod mappings;
pub mod params;
pub mod prelude;
pub mod trace;

pub use error::{Error, Result};
