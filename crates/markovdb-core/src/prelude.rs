//! Convenient re-exports for downstream crates.

pub use crate::catalog::{
    Catalog, Column, ColumnRef, ProcParameter, Procedure, QueryType, Statement, StmtParameter,
    Table, TablePartitioning,
};
pub use crate::config::{EstimationThresholds, SiteConfig};
pub use crate::engine::{DependencySet, EngineError, ExecutionEngine, FragmentBatch, ResultTable};
pub use crate::error::{Error, Result};
pub use crate::estimator::PartitionEstimator;
pub use crate::id::{
    all_partitions, ClientHandle, DependencyId, PartitionId, PartitionSet, ProcId, StmtId, TxnId,
};
pub use crate::mappings::{MappingPolicy, ParameterMapping, ParameterMappingsSet};
pub use crate::params::ParamValue;
pub use crate::trace::{QueryTrace, TransactionTrace};
