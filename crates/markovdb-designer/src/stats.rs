//! Workload statistics the partitioner decides from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use markovdb_core::catalog::Catalog;
use markovdb_core::trace::TransactionTrace;
use markovdb_stats::{Histogram, ValueHistogram};

use crate::error::{DesignError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStatistics {
    /// Estimated bytes for every tuple of the table.
    pub tuple_size_total: u64,
    /// No statement in the workload writes the table.
    pub readonly: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStatistics {
    pub tables: BTreeMap<String, TableStatistics>,
    /// Statement executions per table.
    pub table_access: Histogram<String>,
}

impl WorkloadStatistics {
    /// Derive statistics for every catalog table from `traces`. Tables absent
    /// from `sizes` are treated as empty.
    pub fn from_workload(
        catalog: &Catalog,
        traces: &[TransactionTrace],
        sizes: &BTreeMap<String, u64>,
    ) -> Result<Self> {
        let mut stats = Self::default();
        for table in &catalog.tables {
            stats.tables.insert(
                table.name.clone(),
                TableStatistics {
                    tuple_size_total: sizes.get(&table.name).copied().unwrap_or(0),
                    readonly: true,
                },
            );
        }

        for trace in traces {
            let proc = catalog.procedure(trace.proc)?;
            for q in &trace.queries {
                let stmt = proc.statement(q.stmt).ok_or_else(|| {
                    DesignError::Catalog(format!("procedure '{}' has no statement {}", proc.name, q.stmt))
                })?;
                for table in &stmt.tables {
                    let entry = stats.tables.get_mut(table).ok_or_else(|| {
                        DesignError::Catalog(format!("statement '{}' uses unknown table '{table}'", stmt.name))
                    })?;
                    if !stmt.is_read_only() {
                        entry.readonly = false;
                    }
                    stats.table_access.put(table.clone());
                }
            }
        }
        Ok(stats)
    }

    pub fn table(&self, name: &str) -> Result<&TableStatistics> {
        self.tables
            .get(name)
            .ok_or_else(|| DesignError::Stats(format!("no statistics for table '{name}'")))
    }

    pub fn access_count(&self, table: &str) -> u64 {
        self.table_access.get_or(&table.to_string(), 0)
    }
}
