//! Parameter correlations: which procedure parameter feeds which statement
//! bind parameter, discovered offline from traces.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::id::{ProcId, StmtId};

/// One observed correlation between a statement bind parameter (for a given
/// statement instance) and a procedure parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMapping {
    pub proc: ProcId,
    pub stmt: StmtId,
    #[serde(default)]
    pub instance: u32,
    pub stmt_param: usize,
    pub proc_param: usize,
    /// Element index when `proc_param` is an array parameter.
    #[serde(default)]
    pub proc_param_index: Option<usize>,
    #[serde(default = "default_coefficient")]
    pub coefficient: f64,
}

fn default_coefficient() -> f64 {
    1.0
}

/// How to choose among several correlations recorded for one bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingPolicy {
    /// Take the first correlation in recorded order.
    #[default]
    FirstFound,
    /// Take the correlation with the largest coefficient (ties keep recorded order).
    HighestCoefficient,
}

impl MappingPolicy {
    /// Candidates in the order they should be tried. Callers take the first
    /// one that resolves to a value.
    pub fn ordered<'a>(&self, candidates: &'a [ParameterMapping]) -> Vec<&'a ParameterMapping> {
        let mut out: Vec<&ParameterMapping> = candidates.iter().collect();
        if let MappingPolicy::HighestCoefficient = self {
            // stable: ties keep recorded order
            out.sort_by(|a, b| {
                b.coefficient
                    .partial_cmp(&a.coefficient)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        out
    }
}

type StatementKey = (ProcId, StmtId, u32);

/// Correlation table indexed by (procedure, statement, instance), then by
/// statement parameter index. Recorded order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ParameterMapping>", into = "Vec<ParameterMapping>")]
pub struct ParameterMappingsSet {
    by_statement: HashMap<StatementKey, BTreeMap<usize, Vec<ParameterMapping>>>,
    count: usize,
}

impl ParameterMappingsSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, mapping: ParameterMapping) {
        self.by_statement
            .entry((mapping.proc, mapping.stmt, mapping.instance))
            .or_default()
            .entry(mapping.stmt_param)
            .or_default()
            .push(mapping);
        self.count += 1;
    }

    /// Correlations for one statement invocation, keyed by statement parameter.
    pub fn statement_mappings(
        &self,
        proc: ProcId,
        stmt: StmtId,
        instance: u32,
    ) -> Option<&BTreeMap<usize, Vec<ParameterMapping>>> {
        self.by_statement.get(&(proc, stmt, instance))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl From<Vec<ParameterMapping>> for ParameterMappingsSet {
    fn from(mappings: Vec<ParameterMapping>) -> Self {
        let mut set = Self::new();
        for m in mappings {
            set.add(m);
        }
        set
    }
}

impl From<ParameterMappingsSet> for Vec<ParameterMapping> {
    fn from(set: ParameterMappingsSet) -> Self {
        let mut keys: Vec<StatementKey> = set.by_statement.keys().copied().collect();
        keys.sort();
        let mut by_statement = set.by_statement;
        let mut out = Vec::with_capacity(set.count);
        for key in keys {
            if let Some(params) = by_statement.remove(&key) {
                for (_, mappings) in params {
                    out.extend(mappings);
                }
            }
        }
        out
    }
}
