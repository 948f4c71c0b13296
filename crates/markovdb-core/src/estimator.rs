//! Partition estimation interface.
//!
//! Concrete estimators live elsewhere (`markovdb-designer` ships a
//! catalog-driven one). Everything above this trait treats it as deterministic
//! and side-effect free.

use crate::catalog::{Procedure, Statement};
use crate::error::Result;
use crate::id::{PartitionId, PartitionSet};
use crate::params::ParamValue;

pub trait PartitionEstimator: Send + Sync {
    /// Number of partitions in the cluster.
    fn num_partitions(&self) -> u32;

    /// Partition that owns an invocation of `proc` with `params`.
    fn base_partition(&self, proc: &Procedure, params: &[ParamValue]) -> Result<PartitionId>;

    /// Partitions touched by `stmt` with `params` bound. Unknown parameters
    /// are passed as `ParamValue::Null`.
    fn statement_partitions(
        &self,
        proc: &Procedure,
        stmt: &Statement,
        params: &[ParamValue],
        base_partition: PartitionId,
    ) -> Result<PartitionSet>;
}
