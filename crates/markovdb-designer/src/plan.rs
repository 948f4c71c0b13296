//! Output of a partitioner run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use markovdb_core::catalog::{Catalog, TablePartitioning};

use crate::error::{DesignError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureEntry {
    /// Index of the procedure parameter that routes the invocation.
    pub partition_param: Option<usize>,
    pub single_partition: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    pub tables: BTreeMap<String, TablePartitioning>,
    pub procedures: BTreeMap<String, ProcedureEntry>,
    /// Share of one partition's memory taken by the plan.
    pub memory_per_partition: f64,
}

impl PartitionPlan {
    pub fn table(&self, name: &str) -> Option<&TablePartitioning> {
        self.tables.get(name)
    }

    pub fn is_replicated(&self, table: &str) -> bool {
        matches!(self.tables.get(table), Some(TablePartitioning::Replicated))
    }

    /// Write the plan into the catalog's partitioning metadata.
    pub fn apply(&self, catalog: &mut Catalog) -> Result<()> {
        for (name, method) in &self.tables {
            let table = catalog
                .table_mut(name)
                .ok_or_else(|| DesignError::Catalog(format!("plan names unknown table '{name}'")))?;
            table.partitioning = Some(method.clone());
        }
        for (name, entry) in &self.procedures {
            let proc = catalog.procedure_mut(name).ok_or_else(|| {
                DesignError::Catalog(format!("plan names unknown procedure '{name}'"))
            })?;
            if entry.partition_param.is_some() {
                proc.partition_param = entry.partition_param;
            }
            proc.single_partition = entry.single_partition;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self).map_err(markovdb_core::Error::from)?)
    }
}
