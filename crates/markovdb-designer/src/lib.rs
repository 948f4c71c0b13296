#![forbid(unsafe_code)]
//! markovdb-designer: design-time partitioning.
//!
//! Workload statistics feed the primary-key partitioner, which produces a
//! [`PartitionPlan`] that can be written back into a catalog. The
//! [`CatalogPartitionEstimator`] then routes procedures and statements from
//! that catalog metadata.

pub mod error;
pub mod estimator;
pub mod hasher;
pub mod hints;
pub mod partitioner;
pub mod plan;
pub mod stats;

pub use error::{DesignError, Result};
pub use estimator::CatalogPartitionEstimator;
pub use hasher::DefaultHasher;
pub use hints::DesignerHints;
pub use partitioner::PrimaryKeyPartitioner;
pub use plan::{PartitionPlan, ProcedureEntry};
pub use stats::{TableStatistics, WorkloadStatistics};
