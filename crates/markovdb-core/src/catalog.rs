//! Catalog metadata consumed by the estimators and the transaction layer.
//!
//! Loading a catalog from a schema or DDL is out of scope; catalogs arrive as
//! serde documents (see the CLI) or are built directly in tests.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{all_partitions, PartitionSet, ProcId, StmtId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn is_read_only(self) -> bool {
        matches!(self, QueryType::Select)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

/// A statement bind parameter; `column` is the column it is compared against
/// or assigned to, when there is one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StmtParameter {
    #[serde(default)]
    pub column: Option<ColumnRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub id: StmtId,
    pub name: String,
    pub query_type: QueryType,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub params: Vec<StmtParameter>,
}

impl Statement {
    pub fn is_read_only(&self) -> bool {
        self.query_type.is_read_only()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcParameter {
    pub name: String,
    #[serde(default)]
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: ProcId,
    pub name: String,
    #[serde(default)]
    pub params: Vec<ProcParameter>,
    #[serde(default)]
    pub statements: Vec<Statement>,
    #[serde(default)]
    pub sysproc: bool,
    #[serde(default)]
    pub single_partition: bool,
    /// Index of the procedure parameter that selects the base partition.
    #[serde(default)]
    pub partition_param: Option<usize>,
}

impl Procedure {
    pub fn statement(&self, id: StmtId) -> Option<&Statement> {
        match self.statements.get(id.index()) {
            Some(stmt) if stmt.id == id => Some(stmt),
            _ => self.statements.iter().find(|s| s.id == id),
        }
    }

    pub fn statement_by_name(&self, name: &str) -> Option<&Statement> {
        self.statements.iter().find(|s| s.name == name)
    }

    pub fn is_read_only(&self) -> bool {
        self.statements.iter().all(Statement::is_read_only)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
}

/// How a table's rows are spread over partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum TablePartitioning {
    Replicated,
    Hash { column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub partitioning: Option<TablePartitioning>,
}

impl Table {
    pub fn is_replicated(&self) -> bool {
        matches!(self.partitioning, Some(TablePartitioning::Replicated))
    }

    pub fn partition_column(&self) -> Option<&str> {
        match &self.partitioning {
            Some(TablePartitioning::Hash { column }) => Some(column.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub num_partitions: u32,
    #[serde(default)]
    pub tables: Vec<Table>,
    #[serde(default)]
    pub procedures: Vec<Procedure>,
}

impl Catalog {
    pub fn procedure(&self, id: ProcId) -> Result<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::Catalog(format!("unknown procedure {id}")))
    }

    pub fn procedure_by_name(&self, name: &str) -> Result<&Procedure> {
        self.procedures
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::Catalog(format!("unknown procedure '{name}'")))
    }

    pub fn procedure_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        self.procedures.iter_mut().find(|p| p.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn all_partitions(&self) -> PartitionSet {
        all_partitions(self.num_partitions)
    }

    /// Structural checks the estimators rely on.
    pub fn validate(&self) -> Result<()> {
        if self.num_partitions == 0 {
            return Err(Error::Catalog("catalog has zero partitions".into()));
        }
        for (i, proc) in self.procedures.iter().enumerate() {
            if self.procedures[..i].iter().any(|p| p.id == proc.id) {
                return Err(Error::Catalog(format!("duplicate procedure id {}", proc.id)));
            }
            if let Some(idx) = proc.partition_param {
                if idx >= proc.params.len() {
                    return Err(Error::Catalog(format!(
                        "procedure '{}' partition parameter {idx} out of range",
                        proc.name
                    )));
                }
            }
            for (j, stmt) in proc.statements.iter().enumerate() {
                if proc.statements[..j].iter().any(|s| s.id == stmt.id) {
                    return Err(Error::Catalog(format!(
                        "procedure '{}' has duplicate statement id {}",
                        proc.name, stmt.id
                    )));
                }
                for table in &stmt.tables {
                    if self.table(table).is_none() {
                        return Err(Error::Catalog(format!(
                            "statement '{}.{}' references unknown table '{table}'",
                            proc.name, stmt.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
