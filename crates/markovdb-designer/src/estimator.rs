//! Partition estimation from catalog partitioning metadata.

use std::sync::Arc;

use markovdb_core::catalog::{Catalog, Procedure, Statement, TablePartitioning};
use markovdb_core::error::{Error, Result};
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionId, PartitionSet};
use markovdb_core::params::ParamValue;

use crate::hasher::DefaultHasher;

/// Routes procedures by their partitioning parameter and statements by the
/// values bound to each table's partitioning column.
#[derive(Debug, Clone)]
pub struct CatalogPartitionEstimator {
    catalog: Arc<Catalog>,
    hasher: DefaultHasher,
}

impl CatalogPartitionEstimator {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let hasher = DefaultHasher::new(catalog.num_partitions);
        Self { catalog, hasher }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn hash_into(&self, value: &ParamValue, out: &mut PartitionSet) -> bool {
        match value {
            ParamValue::Array(values) => {
                let mut any = false;
                for v in values {
                    any |= self.hash_into(v, out);
                }
                any
            }
            v => match self.hasher.hash(v) {
                Some(p) => {
                    out.insert(p);
                    true
                }
                None => false,
            },
        }
    }
}

impl PartitionEstimator for CatalogPartitionEstimator {
    fn num_partitions(&self) -> u32 {
        self.catalog.num_partitions
    }

    fn base_partition(&self, proc: &Procedure, params: &[ParamValue]) -> Result<PartitionId> {
        let Some(idx) = proc.partition_param else {
            return Ok(PartitionId::new(0));
        };
        let value = params.get(idx).ok_or_else(|| {
            Error::Estimation(format!(
                "procedure '{}' expects partitioning parameter {idx}, got {} parameters",
                proc.name,
                params.len()
            ))
        })?;
        self.hasher.hash(value).ok_or_else(|| {
            Error::Estimation(format!(
                "procedure '{}' partitioning parameter is not hashable",
                proc.name
            ))
        })
    }

    fn statement_partitions(
        &self,
        _proc: &Procedure,
        stmt: &Statement,
        params: &[ParamValue],
        base_partition: PartitionId,
    ) -> Result<PartitionSet> {
        let mut out = PartitionSet::new();
        for name in &stmt.tables {
            let table = self
                .catalog
                .table(name)
                .ok_or_else(|| Error::Catalog(format!("unknown table '{name}'")))?;
            match &table.partitioning {
                Some(TablePartitioning::Hash { column }) => {
                    let bound = stmt.params.iter().zip(params).any(|(p, value)| {
                        let on_column = p
                            .column
                            .as_ref()
                            .is_some_and(|c| c.table == *name && c.column == *column);
                        on_column && self.hash_into(value, &mut out)
                    });
                    if !bound {
                        out.extend(self.catalog.all_partitions());
                    }
                }
                Some(TablePartitioning::Replicated) | None => {
                    if stmt.is_read_only() {
                        out.insert(base_partition);
                    } else {
                        out.extend(self.catalog.all_partitions());
                    }
                }
            }
        }
        if out.is_empty() {
            out.insert(base_partition);
        }
        Ok(out)
    }
}
