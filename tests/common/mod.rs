//! Shared fixtures: a small two-partition order-entry catalog, its parameter
//! correlations, trace builders, and an in-memory execution engine.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use markovdb_core::catalog::{
    Catalog, Column, ColumnRef, ProcParameter, Procedure, QueryType, Statement, StmtParameter,
    Table, TablePartitioning,
};
use markovdb_core::engine::{DependencySet, EngineError, ExecutionEngine, FragmentBatch, ResultTable};
use markovdb_core::id::{PartitionId, ProcId, StmtId, TxnId};
use markovdb_core::mappings::{ParameterMapping, ParameterMappingsSet};
use markovdb_core::params::ParamValue;
use markovdb_core::trace::TransactionTrace;
use markovdb_designer::CatalogPartitionEstimator;

pub const NEW_ORDER: ProcId = ProcId::new(0);
pub const PAYMENT: ProcId = ProcId::new(1);
pub const FLUSH: ProcId = ProcId::new(2);

pub const GET_WAREHOUSE: StmtId = StmtId::new(0);
pub const GET_ITEM: StmtId = StmtId::new(1);
pub const UPDATE_DISTRICT: StmtId = StmtId::new(2);

pub const PAY_GET_WAREHOUSE: StmtId = StmtId::new(0);
pub const PAY_UPDATE_REMOTE: StmtId = StmtId::new(1);

fn col(table: &str, column: &str) -> StmtParameter {
    StmtParameter {
        column: Some(ColumnRef {
            table: table.to_string(),
            column: column.to_string(),
        }),
    }
}

fn table(name: &str, columns: &[&str], pk: &[&str], partitioning: Option<TablePartitioning>) -> Table {
    Table {
        name: name.to_string(),
        columns: columns
            .iter()
            .map(|c| Column {
                name: c.to_string(),
            })
            .collect(),
        primary_key: pk.iter().map(|c| c.to_string()).collect(),
        partitioning,
    }
}

fn stmt(id: StmtId, name: &str, query_type: QueryType, table: &str, params: Vec<StmtParameter>) -> Statement {
    Statement {
        id,
        name: name.to_string(),
        query_type,
        tables: vec![table.to_string()],
        params,
    }
}

fn hash_on(column: &str) -> Option<TablePartitioning> {
    Some(TablePartitioning::Hash {
        column: column.to_string(),
    })
}

/// Two partitions. `warehouse` and `district` are hashed on the warehouse
/// id, `item` is replicated, `history` has no primary key.
pub fn catalog() -> Catalog {
    Catalog {
        num_partitions: 2,
        tables: vec![
            table("warehouse", &["w_id", "w_name"], &["w_id"], hash_on("w_id")),
            table("district", &["d_w_id", "d_id"], &["d_w_id", "d_id"], hash_on("d_w_id")),
            table("item", &["i_id", "i_name"], &["i_id"], Some(TablePartitioning::Replicated)),
            table("history", &["h_w_id", "h_amount"], &[], None),
        ],
        procedures: vec![
            Procedure {
                id: NEW_ORDER,
                name: "neworder".into(),
                params: vec![
                    ProcParameter {
                        name: "w_id".into(),
                        is_array: false,
                    },
                    ProcParameter {
                        name: "i_ids".into(),
                        is_array: true,
                    },
                ],
                statements: vec![
                    stmt(GET_WAREHOUSE, "getWarehouse", QueryType::Select, "warehouse", vec![col("warehouse", "w_id")]),
                    stmt(GET_ITEM, "getItem", QueryType::Select, "item", vec![col("item", "i_id")]),
                    stmt(UPDATE_DISTRICT, "updateDistrict", QueryType::Update, "district", vec![col("district", "d_w_id")]),
                ],
                sysproc: false,
                single_partition: false,
                partition_param: Some(0),
            },
            Procedure {
                id: PAYMENT,
                name: "payment".into(),
                params: vec![
                    ProcParameter {
                        name: "w_id".into(),
                        is_array: false,
                    },
                    ProcParameter {
                        name: "c_w_id".into(),
                        is_array: false,
                    },
                ],
                statements: vec![
                    stmt(PAY_GET_WAREHOUSE, "getWarehouse", QueryType::Select, "warehouse", vec![col("warehouse", "w_id")]),
                    stmt(PAY_UPDATE_REMOTE, "updateRemote", QueryType::Update, "warehouse", vec![col("warehouse", "w_id")]),
                ],
                sysproc: false,
                single_partition: false,
                partition_param: Some(0),
            },
            Procedure {
                id: FLUSH,
                name: "@flush".into(),
                params: vec![],
                statements: vec![],
                sysproc: true,
                single_partition: true,
                partition_param: None,
            },
        ],
    }
}

fn mapping(proc: ProcId, stmt: StmtId, proc_param: usize, index: Option<usize>) -> ParameterMapping {
    ParameterMapping {
        proc,
        stmt,
        instance: 0,
        stmt_param: 0,
        proc_param,
        proc_param_index: index,
        coefficient: 1.0,
    }
}

pub fn mappings() -> ParameterMappingsSet {
    let mut set = ParameterMappingsSet::new();
    set.add(mapping(NEW_ORDER, GET_WAREHOUSE, 0, None));
    set.add(mapping(NEW_ORDER, GET_ITEM, 1, Some(0)));
    set.add(mapping(NEW_ORDER, UPDATE_DISTRICT, 0, None));
    set.add(mapping(PAYMENT, PAY_GET_WAREHOUSE, 0, None));
    set.add(mapping(PAYMENT, PAY_UPDATE_REMOTE, 1, None));
    set
}

pub fn estimator(catalog: &Arc<Catalog>) -> CatalogPartitionEstimator {
    CatalogPartitionEstimator::new(Arc::clone(catalog))
}

pub fn new_order_args(w_id: i64, item: i64) -> Vec<ParamValue> {
    vec![ParamValue::Int(w_id), ParamValue::Array(vec![ParamValue::Int(item)])]
}

/// neworder at `w_id`: one batch of warehouse read, item read, district update.
pub fn new_order_trace(txn: u64, w_id: i64, item: i64) -> TransactionTrace {
    let mut trace = TransactionTrace::new(TxnId::new(txn), NEW_ORDER, new_order_args(w_id, item));
    trace
        .push_query(GET_WAREHOUSE, vec![ParamValue::Int(w_id)], 0)
        .push_query(GET_ITEM, vec![ParamValue::Int(item)], 0)
        .push_query(UPDATE_DISTRICT, vec![ParamValue::Int(w_id)], 0);
    trace
}

/// payment at `w_id` updating the warehouse of `c_w_id`, in two batches.
pub fn payment_trace(txn: u64, w_id: i64, c_w_id: i64) -> TransactionTrace {
    let mut trace = TransactionTrace::new(
        TxnId::new(txn),
        PAYMENT,
        vec![ParamValue::Int(w_id), ParamValue::Int(c_w_id)],
    );
    trace
        .push_query(PAY_GET_WAREHOUSE, vec![ParamValue::Int(w_id)], 0)
        .push_query(PAY_UPDATE_REMOTE, vec![ParamValue::Int(c_w_id)], 1);
    trace
}

pub fn p(id: u32) -> PartitionId {
    PartitionId::new(id)
}

/// Scratch file under the system temp dir, unique per process and `name`.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("markovdb-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir.join(name)
}

/// Executes every fragment by answering each output dependency with one row
/// naming the partition, followed by every row of the fragment's inputs.
#[derive(Default)]
pub struct MockEngine {
    /// Fragment id that fails with `ERRORCODE_ERROR`.
    pub fail_fragment: Option<u64>,
    /// Execute but answer no dependency, as if every result were still in
    /// flight from another site.
    pub withhold_results: bool,
    pub executed: Mutex<Vec<(PartitionId, Vec<u64>)>>,
    pub released: Mutex<Vec<(PartitionId, u64)>>,
    pub undone: Mutex<Vec<(PartitionId, u64)>>,
}

impl MockEngine {
    pub fn failing_on(fragment_id: u64) -> Self {
        Self {
            fail_fragment: Some(fragment_id),
            ..Self::default()
        }
    }

    pub fn withholding() -> Self {
        Self {
            withhold_results: true,
            ..Self::default()
        }
    }
}

impl ExecutionEngine for MockEngine {
    fn execute_fragments(
        &self,
        partition: PartitionId,
        batch: &FragmentBatch,
    ) -> Result<DependencySet, EngineError> {
        if let Some(bad) = self.fail_fragment {
            if batch.fragment_ids.contains(&bad) {
                return Err(EngineError::with_payload(
                    markovdb_core::engine::ERRORCODE_ERROR,
                    b"constraint violation".to_vec(),
                ));
            }
        }
        self.executed
            .lock()
            .push((partition, batch.fragment_ids.clone()));

        let mut dependencies = Vec::new();
        if self.withhold_results {
            return Ok(DependencySet {
                dependencies,
                dirty: true,
            });
        }
        for (i, dep) in batch.output_deps.iter().enumerate() {
            let mut table = ResultTable::new(vec!["partition".into()])
                .with_row(vec![ParamValue::Int(i64::from(partition.get()))]);
            if let Some(Some(input)) = batch.input_deps.get(i) {
                for t in batch.inputs.get(input).into_iter().flatten() {
                    table.rows.extend(t.rows.iter().cloned());
                }
            }
            dependencies.push((*dep, table));
        }
        Ok(DependencySet {
            dependencies,
            dirty: true,
        })
    }

    fn release_undo_token(&self, partition: PartitionId, undo_token: u64) -> bool {
        self.released.lock().push((partition, undo_token));
        true
    }

    fn undo_undo_token(&self, partition: PartitionId, undo_token: u64) -> bool {
        self.undone.lock().push((partition, undo_token));
        true
    }
}
