//! Partition plans, workload statistics, and catalog-driven routing.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use markovdb_core::catalog::{ColumnRef, QueryType, Statement, StmtParameter, TablePartitioning};
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionSet, StmtId};
use markovdb_core::mappings::{ParameterMapping, ParameterMappingsSet};
use markovdb_core::params::ParamValue;
use markovdb_designer::{
    DesignError, DesignerHints, PartitionPlan, PrimaryKeyPartitioner, WorkloadStatistics,
};

fn hashed(column: &str) -> TablePartitioning {
    TablePartitioning::Hash {
        column: column.to_string(),
    }
}

fn stats_for(traces: &[markovdb_core::trace::TransactionTrace], sizes: &[(&str, u64)]) -> WorkloadStatistics {
    let sizes: BTreeMap<String, u64> = sizes.iter().map(|(t, s)| (t.to_string(), *s)).collect();
    WorkloadStatistics::from_workload(&catalog(), traces, &sizes).expect("statistics")
}

fn new_order_workload() -> Vec<markovdb_core::trace::TransactionTrace> {
    (0..4).map(|i| new_order_trace(i, (i % 2) as i64, 5)).collect()
}

#[test]
fn test_workload_statistics() {
    let mut traces = new_order_workload();
    traces.push(payment_trace(10, 0, 1));
    let stats = stats_for(&traces, &[("item", 100)]);

    assert_eq!(stats.access_count("warehouse"), 6);
    assert_eq!(stats.access_count("item"), 4);
    assert_eq!(stats.access_count("history"), 0);
    assert!(stats.table("item").expect("item").readonly);
    assert!(!stats.table("warehouse").expect("warehouse").readonly);
    assert!(!stats.table("district").expect("district").readonly);
    assert_eq!(stats.table("item").expect("item").tuple_size_total, 100);
    assert_eq!(stats.table("district").expect("district").tuple_size_total, 0);
    assert!(matches!(stats.table("orders"), Err(DesignError::Stats(_))));
}

#[test]
fn test_default_plan_hashes_on_primary_key() {
    let catalog = catalog();
    let stats = stats_for(&new_order_workload(), &[]);
    let mappings = mappings();
    let plan = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings)
        .generate(&DesignerHints::default())
        .expect("plan");

    assert_eq!(plan.table("warehouse"), Some(&hashed("w_id")));
    assert_eq!(plan.table("district"), Some(&hashed("d_w_id")));
    assert_eq!(plan.table("item"), Some(&hashed("i_id")));
    // no primary key to hash on
    assert!(plan.is_replicated("history"));
    assert_eq!(plan.memory_per_partition, 0.0);

    // getItem routes on a parameter other than w_id
    let new_order = &plan.procedures["neworder"];
    assert_eq!(new_order.partition_param, Some(0));
    assert!(!new_order.single_partition);
    assert!(!plan.procedures["payment"].single_partition);
    // system procedures keep their catalog flags
    assert!(plan.procedures["@flush"].single_partition);
}

#[test]
fn test_forced_replication_makes_single_partition() {
    let catalog = catalog();
    let stats = stats_for(&new_order_workload(), &[]);
    let mappings = mappings();
    let hints = DesignerHints {
        force_replication: ["item".to_string()].into(),
        ..DesignerHints::default()
    };
    let plan = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings)
        .generate(&hints)
        .expect("plan");
    assert!(plan.is_replicated("item"));
    assert!(plan.procedures["neworder"].single_partition);
    assert!(!plan.procedures["payment"].single_partition);
}

#[test]
fn test_small_read_only_tables_replicated() {
    let catalog = catalog();
    let stats = stats_for(
        &new_order_workload(),
        &[("item", 100), ("warehouse", 50), ("district", 400)],
    );
    let mappings = mappings();
    let hints = DesignerHints {
        replication_size_limit: Some(0.5),
        max_memory_per_partition: 1000,
        ..DesignerHints::default()
    };
    let plan = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings)
        .generate(&hints)
        .expect("plan");

    assert!(plan.is_replicated("item"));
    // only read by this workload
    assert!(plan.is_replicated("warehouse"));
    assert_eq!(plan.table("district"), Some(&hashed("d_w_id")));
    // 0.1 + 0.05 replicated, 0.4 split over two partitions
    assert!((plan.memory_per_partition - 0.35).abs() < 1e-9);
}

#[test]
#[should_panic(expected = "partition plan needs")]
fn test_replication_over_memory_panics() {
    let catalog = catalog();
    let stats = stats_for(&new_order_workload(), &[("history", 5000)]);
    let mappings = mappings();
    let hints = DesignerHints {
        replication_size_limit: Some(0.5),
        max_memory_per_partition: 1000,
        ..DesignerHints::default()
    };
    let _ = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings).generate(&hints);
}

#[test]
fn test_parameter_search_prefers_correlated_param() {
    let catalog = catalog();
    let stats = stats_for(&[], &[]);
    let mut mappings = ParameterMappingsSet::new();
    mappings.add(ParameterMapping {
        proc: PAYMENT,
        stmt: PAY_UPDATE_REMOTE,
        instance: 0,
        stmt_param: 0,
        proc_param: 1,
        proc_param_index: None,
        coefficient: 0.9,
    });
    let hints = DesignerHints {
        enable_procparameter_search: true,
        ..DesignerHints::default()
    };
    let plan = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings)
        .generate(&hints)
        .expect("plan");
    assert_eq!(plan.procedures["payment"].partition_param, Some(1));
    // nothing correlates with neworder's parameters
    assert_eq!(plan.procedures["neworder"].partition_param, Some(0));
    assert_eq!(plan.procedures["@flush"].partition_param, None);
}

#[test]
fn test_apply_writes_catalog() {
    let mut catalog = catalog();
    let stats = stats_for(&new_order_workload(), &[]);
    let mappings = mappings();
    let hints = DesignerHints {
        force_replication: ["item".to_string()].into(),
        ..DesignerHints::default()
    };
    let plan = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings)
        .generate(&hints)
        .expect("plan");
    plan.apply(&mut catalog).expect("apply");

    let item = catalog.table("item").expect("item");
    assert!(item.is_replicated());
    let history = catalog.table("history").expect("history");
    assert!(history.is_replicated());
    let new_order = catalog.procedure_by_name("neworder").expect("neworder");
    assert!(new_order.single_partition);
    assert_eq!(new_order.partition_param, Some(0));

    let json = plan.to_json().expect("json");
    let back: PartitionPlan = serde_json::from_str(&json).expect("parse");
    assert_eq!(back, plan);

    let mut bogus = PartitionPlan::default();
    bogus
        .tables
        .insert("orders".into(), TablePartitioning::Replicated);
    assert!(matches!(bogus.apply(&mut catalog), Err(DesignError::Catalog(_))));
}

fn set(ids: &[u32]) -> PartitionSet {
    ids.iter().copied().map(p).collect()
}

fn ad_hoc(query_type: QueryType, table: &str, column: &str) -> Statement {
    Statement {
        id: StmtId::new(9),
        name: "adHoc".into(),
        query_type,
        tables: vec![table.to_string()],
        params: vec![StmtParameter {
            column: Some(ColumnRef {
                table: table.to_string(),
                column: column.to_string(),
            }),
        }],
    }
}

#[test]
fn test_catalog_estimator_routing() {
    let catalog = Arc::new(catalog());
    let pest = estimator(&catalog);
    let new_order = catalog.procedure(NEW_ORDER).expect("neworder");
    let flush = catalog.procedure(FLUSH).expect("flush");

    assert_eq!(pest.num_partitions(), 2);
    assert_eq!(pest.base_partition(new_order, &new_order_args(3, 1)).expect("base"), p(1));
    assert_eq!(pest.base_partition(flush, &[]).expect("base"), p(0));
    assert!(pest.base_partition(new_order, &[]).is_err());
    assert!(pest
        .base_partition(new_order, &[ParamValue::Null])
        .is_err());

    let warehouse = ad_hoc(QueryType::Select, "warehouse", "w_id");
    let routed = |stmt: &Statement, params: &[ParamValue]| {
        pest.statement_partitions(new_order, stmt, params, p(1))
            .expect("partitions")
    };
    assert_eq!(routed(&warehouse, &[ParamValue::Int(4)]), set(&[0]));
    let many = ParamValue::Array(vec![ParamValue::Int(0), ParamValue::Int(1)]);
    assert_eq!(routed(&warehouse, &[many]), set(&[0, 1]));
    // unknown value on a hashed column may go anywhere
    assert_eq!(routed(&warehouse, &[ParamValue::Null]), set(&[0, 1]));

    let read_item = ad_hoc(QueryType::Select, "item", "i_id");
    assert_eq!(routed(&read_item, &[ParamValue::Int(0)]), set(&[1]));
    let write_item = ad_hoc(QueryType::Update, "item", "i_id");
    assert_eq!(routed(&write_item, &[ParamValue::Int(0)]), set(&[0, 1]));

    let unknown = ad_hoc(QueryType::Select, "orders", "o_id");
    assert!(pest
        .statement_partitions(new_order, &unknown, &[ParamValue::Int(1)], p(0))
        .is_err());
}
