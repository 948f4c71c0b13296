//! Primary-key partitioner.
//!
//! Tables are replicated when forced, when they are read-only and small
//! enough, or when they have no primary key; everything else is hashed on
//! its first primary-key column. Procedures optionally get a routing
//! parameter, then are flagged single-partition from the resulting plan.

use markovdb_core::catalog::{Catalog, ColumnRef, Procedure, TablePartitioning};
use markovdb_core::mappings::ParameterMappingsSet;

use crate::error::Result;
use crate::hints::DesignerHints;
use crate::plan::{PartitionPlan, ProcedureEntry};
use crate::stats::WorkloadStatistics;

pub struct PrimaryKeyPartitioner<'a> {
    catalog: &'a Catalog,
    stats: &'a WorkloadStatistics,
    mappings: &'a ParameterMappingsSet,
}

impl<'a> PrimaryKeyPartitioner<'a> {
    pub fn new(
        catalog: &'a Catalog,
        stats: &'a WorkloadStatistics,
        mappings: &'a ParameterMappingsSet,
    ) -> Self {
        Self {
            catalog,
            stats,
            mappings,
        }
    }

    /// Panics if replicated tables would not fit in one partition's memory.
    pub fn generate(&self, hints: &DesignerHints) -> Result<PartitionPlan> {
        let mut plan = PartitionPlan::default();
        let calculate_memory = hints.calculates_memory();
        let limit = hints.replication_size_limit.unwrap_or(0.0);
        let n = f64::from(self.catalog.num_partitions.max(1));
        let mut total_memory = 0.0;

        for table in &self.catalog.tables {
            let ts = self.stats.table(&table.name)?;
            let size_ratio = if calculate_memory {
                ts.tuple_size_total as f64 / hints.max_memory_per_partition as f64
            } else {
                0.0
            };
            let method = match table.primary_key.first() {
                Some(column)
                    if !hints.force_replication.contains(&table.name)
                        && !(calculate_memory && ts.readonly && size_ratio <= limit) =>
                {
                    total_memory += size_ratio / n;
                    TablePartitioning::Hash {
                        column: column.clone(),
                    }
                }
                _ => {
                    total_memory += size_ratio;
                    #[cfg(feature = "tracing")]
                    tracing::debug!(table = %table.name, size_ratio, "replicating table");
                    TablePartitioning::Replicated
                }
            };
            plan.tables.insert(table.name.clone(), method);
        }
        assert!(
            total_memory <= 1.0,
            "partition plan needs {:.1}% of a partition's memory",
            total_memory * 100.0
        );
        plan.memory_per_partition = total_memory;

        for proc in &self.catalog.procedures {
            let mut entry = ProcedureEntry {
                partition_param: proc.partition_param,
                single_partition: proc.single_partition,
            };
            if hints.enable_procparameter_search && !proc.sysproc && !proc.params.is_empty() {
                entry.partition_param = Some(self.best_proc_param(proc, &plan));
            }
            if !proc.sysproc {
                entry.single_partition = self.is_single_partition(proc, entry.partition_param, &plan);
            }
            plan.procedures.insert(proc.name.clone(), entry);
        }
        Ok(plan)
    }

    /// Partitioning column of `table` under `plan`, if hashed.
    fn partition_column<'p>(plan: &'p PartitionPlan, table: &str) -> Option<&'p str> {
        match plan.table(table) {
            Some(TablePartitioning::Hash { column }) => Some(column.as_str()),
            _ => None,
        }
    }

    /// Whether statement parameter `param` binds the partitioning column of
    /// one of the tables it reads or writes.
    fn binds_partition_column(plan: &PartitionPlan, column: Option<&ColumnRef>) -> bool {
        column.is_some_and(|c| Self::partition_column(plan, &c.table) == Some(c.column.as_str()))
    }

    /// Procedure parameter most strongly correlated with partitioning
    /// columns. Ties go to the lower index; no correlation at all picks 0.
    fn best_proc_param(&self, proc: &Procedure, plan: &PartitionPlan) -> usize {
        let mut scores = vec![0.0f64; proc.params.len()];
        for stmt in &proc.statements {
            for instance in 0.. {
                let Some(by_param) = self.mappings.statement_mappings(proc.id, stmt.id, instance) else {
                    break;
                };
                for (stmt_param, mappings) in by_param {
                    let column = stmt.params.get(*stmt_param).and_then(|p| p.column.as_ref());
                    if !Self::binds_partition_column(plan, column) {
                        continue;
                    }
                    for m in mappings {
                        if let Some(score) = scores.get_mut(m.proc_param) {
                            *score += m.coefficient;
                        }
                    }
                }
            }
        }
        let mut best = 0;
        for (i, s) in scores.iter().enumerate() {
            if *s > scores[best] {
                best = i;
            }
        }
        best
    }

    /// Every statement either reads replicated tables only, or binds the
    /// partitioning column of each hashed table it touches to a value
    /// correlated with the routing parameter.
    fn is_single_partition(&self, proc: &Procedure, partition_param: Option<usize>, plan: &PartitionPlan) -> bool {
        proc.statements.iter().all(|stmt| {
            stmt.tables.iter().all(|table| match Self::partition_column(plan, table) {
                None => stmt.is_read_only(),
                Some(column) => {
                    let Some(routing) = partition_param else {
                        return false;
                    };
                    stmt.params.iter().enumerate().any(|(i, p)| {
                        let binds = p
                            .column
                            .as_ref()
                            .is_some_and(|c| c.table == *table && c.column == column);
                        binds
                            && self
                                .mappings
                                .statement_mappings(proc.id, stmt.id, 0)
                                .and_then(|m| m.get(&i))
                                .is_some_and(|ms| ms.iter().any(|m| m.proc_param == routing))
                    })
                }
            })
        })
    }
}
