use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Knobs for one partitioner run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignerHints {
    /// Tables replicated regardless of their statistics.
    pub force_replication: BTreeSet<String>,
    /// Largest share of a partition's memory a read-only table may take and
    /// still be replicated. `None` disables size-based replication.
    pub replication_size_limit: Option<f64>,
    /// Bytes available per partition. Zero disables memory accounting.
    pub max_memory_per_partition: u64,
    /// Pick a partitioning parameter for every procedure.
    pub enable_procparameter_search: bool,
}

impl DesignerHints {
    pub(crate) fn calculates_memory(&self) -> bool {
        self.replication_size_limit.is_some() && self.max_memory_per_partition != 0
    }
}
