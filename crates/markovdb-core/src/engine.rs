//! Boundary to the native fragment executor.
//!
//! The executor itself is out of scope. The transaction layer only needs to
//! hand it a batch of compiled fragments and get result tables back keyed by
//! output dependency id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{DependencyId, PartitionId, TxnId};
use crate::params::ParamValue;

pub const ERRORCODE_SUCCESS: i32 = 0;
pub const ERRORCODE_ERROR: i32 = 1;
pub const ERRORCODE_WRONG_SERIALIZED_BYTES: i32 = 101;

/// Failure raised by the executor: an engine-defined code plus an optional
/// serialized exception.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("execution engine failed with code {code}")]
pub struct EngineError {
    pub code: i32,
    pub payload: Option<Vec<u8>>,
}

impl EngineError {
    pub fn new(code: i32) -> Self {
        Self { code, payload: None }
    }

    pub fn with_payload(code: i32, payload: Vec<u8>) -> Self {
        Self {
            code,
            payload: Some(payload),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<ParamValue>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<ParamValue>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// One call into the executor. Vectors are parallel: entry `i` describes fragment `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentBatch {
    pub fragment_ids: Vec<u64>,
    pub input_deps: Vec<Option<DependencyId>>,
    pub output_deps: Vec<DependencyId>,
    pub params: Vec<Vec<ParamValue>>,
    /// Tables for input dependencies produced by earlier fragments.
    pub inputs: HashMap<DependencyId, Vec<ResultTable>>,
    pub txn_id: Option<TxnId>,
    pub last_committed_txn_id: Option<TxnId>,
    pub undo_token: u64,
}

impl FragmentBatch {
    pub fn len(&self) -> usize {
        self.fragment_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragment_ids.is_empty()
    }
}

/// Result tables keyed by output dependency, in fragment order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencySet {
    pub dependencies: Vec<(DependencyId, ResultTable)>,
    /// The batch modified data.
    pub dirty: bool,
}

impl DependencySet {
    pub fn get(&self, dep: DependencyId) -> Option<&ResultTable> {
        self.dependencies
            .iter()
            .find(|(id, _)| *id == dep)
            .map(|(_, t)| t)
    }
}

pub trait ExecutionEngine: Send + Sync {
    /// Execute every fragment in `batch` on `partition`. Any failure is fatal
    /// to the whole batch and is never retried here.
    fn execute_fragments(
        &self,
        partition: PartitionId,
        batch: &FragmentBatch,
    ) -> Result<DependencySet, EngineError>;

    /// Make the work done under `undo_token` permanent.
    fn release_undo_token(&self, partition: PartitionId, undo_token: u64) -> bool;

    /// Roll back the work done under `undo_token`.
    fn undo_undo_token(&self, partition: PartitionId, undo_token: u64) -> bool;
}
