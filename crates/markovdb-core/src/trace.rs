//! Completed transaction traces: the training input of the execution-path graphs.

use serde::{Deserialize, Serialize};

use crate::id::{ProcId, StmtId, TxnId};
use crate::params::ParamValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTrace {
    pub stmt: StmtId,
    #[serde(default)]
    pub params: Vec<ParamValue>,
    /// Batch this query was submitted in (0-based, non-decreasing within a trace).
    #[serde(default)]
    pub batch: usize,
    /// The query raised an error that aborted the transaction.
    #[serde(default)]
    pub aborted: bool,
    /// Observed execution time, when the tracer recorded one.
    #[serde(default)]
    pub elapsed_ns: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionTrace {
    pub txn_id: TxnId,
    pub proc: ProcId,
    #[serde(default)]
    pub params: Vec<ParamValue>,
    #[serde(default)]
    pub queries: Vec<QueryTrace>,
    #[serde(default)]
    pub aborted: bool,
}

impl TransactionTrace {
    pub fn new(txn_id: TxnId, proc: ProcId, params: Vec<ParamValue>) -> Self {
        Self {
            txn_id,
            proc,
            params,
            queries: Vec::new(),
            aborted: false,
        }
    }

    /// Append a query to `batch`.
    pub fn push_query(&mut self, stmt: StmtId, params: Vec<ParamValue>, batch: usize) -> &mut Self {
        self.queries.push(QueryTrace {
            stmt,
            params,
            batch,
            aborted: false,
            elapsed_ns: None,
        });
        self
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted || self.queries.iter().any(|q| q.aborted)
    }

    pub fn batch_count(&self) -> usize {
        self.batches().len()
    }

    /// Queries grouped into their batches, in submission order.
    pub fn batches(&self) -> Vec<&[QueryTrace]> {
        let mut out = Vec::new();
        let mut start = 0;
        for i in 1..=self.queries.len() {
            if i == self.queries.len() || self.queries[i].batch != self.queries[start].batch {
                out.push(&self.queries[start..i]);
                start = i;
            }
        }
        out
    }
}
