//! Units of work shipped to a partition's executor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use markovdb_core::engine::{FragmentBatch, ResultTable};
use markovdb_core::id::{DependencyId, PartitionId, StmtId, TxnId};
use markovdb_core::params::ParamValue;

/// One compiled plan fragment of one statement in the current batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: u64,
    pub stmt: StmtId,
    /// Position of the statement in the batch.
    pub stmt_index: usize,
    pub input_dep: Option<DependencyId>,
    pub output_dep: Option<DependencyId>,
    #[serde(default)]
    pub params: Vec<ParamValue>,
}

impl Fragment {
    pub fn new(fragment_id: u64, stmt: StmtId, stmt_index: usize) -> Self {
        Self {
            fragment_id,
            stmt,
            stmt_index,
            input_dep: None,
            output_dep: None,
            params: Vec::new(),
        }
    }

    pub fn input(mut self, dep: DependencyId) -> Self {
        self.input_dep = Some(dep);
        self
    }

    pub fn output(mut self, dep: DependencyId) -> Self {
        self.output_dep = Some(dep);
        self
    }

    pub fn params(mut self, params: Vec<ParamValue>) -> Self {
        self.params = params;
        self
    }
}

/// Fragments of one transaction bound for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentTaskMessage {
    /// Unique within the transaction.
    pub task_id: u64,
    pub txn_id: TxnId,
    pub destination: PartitionId,
    pub fragments: Vec<Fragment>,
}

impl FragmentTaskMessage {
    pub fn new(task_id: u64, txn_id: TxnId, destination: PartitionId) -> Self {
        Self {
            task_id,
            txn_id,
            destination,
            fragments: Vec::new(),
        }
    }

    pub fn with_fragment(mut self, fragment: Fragment) -> Self {
        self.fragments.push(fragment);
        self
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn has_input_dependencies(&self) -> bool {
        self.fragments.iter().any(|f| f.input_dep.is_some())
    }

    pub fn has_output_dependencies(&self) -> bool {
        self.fragments.iter().any(|f| f.output_dep.is_some())
    }

    /// Executor call for this task.
    pub fn to_batch(
        &self,
        inputs: HashMap<DependencyId, Vec<ResultTable>>,
        last_committed_txn_id: Option<TxnId>,
        undo_token: u64,
    ) -> FragmentBatch {
        FragmentBatch {
            fragment_ids: self.fragments.iter().map(|f| f.fragment_id).collect(),
            input_deps: self.fragments.iter().map(|f| f.input_dep).collect(),
            output_deps: self.fragments.iter().filter_map(|f| f.output_dep).collect(),
            params: self.fragments.iter().map(|f| f.params.clone()).collect(),
            inputs,
            txn_id: Some(self.txn_id),
            last_committed_txn_id,
            undo_token,
        }
    }
}
