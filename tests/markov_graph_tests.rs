//! Execution-path graph construction and probability computation.

mod common;

use std::sync::Arc;

use common::*;
use markovdb_core::catalog::QueryType;
use markovdb_core::id::PartitionSet;
use markovdb_core::params::ParamValue;
use markovdb_markov::{assert_sane, is_sane, MarkovGraph, VertexKind, PROBABILITY_EPSILON};

fn trained(traces: &[markovdb_core::trace::TransactionTrace]) -> MarkovGraph {
    let catalog = Arc::new(catalog());
    let pest = estimator(&catalog);
    let first = traces.first().expect("at least one trace");
    let proc = catalog.procedure(first.proc).expect("procedure");
    let base = markovdb_core::estimator::PartitionEstimator::base_partition(&pest, proc, &first.params)
        .expect("base partition");
    let mut graph = MarkovGraph::initialized(proc.id, base, catalog.num_partitions);
    for t in traces {
        graph
            .process_transaction(t, proc, &pest)
            .expect("process trace");
    }
    graph.recompute_graph();
    graph
}

fn set(ids: &[u32]) -> PartitionSet {
    ids.iter().copied().map(p).collect()
}

#[test]
fn test_single_path_graph_is_sane() {
    let traces: Vec<_> = (0..10).map(|i| new_order_trace(i, 1, 7)).collect();
    let graph = trained(&traces);
    assert_sane(&graph);
    // START, COMMIT, ABORT and one vertex per statement
    assert_eq!(graph.vertex_count(), 6);
    assert_eq!(graph.txn_count(), 10);
    assert_eq!(graph.instance_txn_count(), 0);

    let start = graph.vertex(graph.start());
    assert_eq!(start.total_hits(), 10);
    assert_eq!(graph.vertex(graph.commit()).total_hits(), 10);
    assert_eq!(graph.vertex(graph.abort()).total_hits(), 0);
}

#[test]
fn test_replay_reuses_vertex_identity() {
    let once = trained(&[new_order_trace(1, 1, 7)]);
    let twice = trained(&[new_order_trace(1, 1, 7), new_order_trace(2, 1, 7)]);
    assert_eq!(once.vertex_count(), twice.vertex_count());
    assert_eq!(once.edge_count(), twice.edge_count());

    let v = twice
        .find_vertex(GET_WAREHOUSE, 0, &set(&[1]))
        .expect("warehouse vertex");
    assert_eq!(twice.vertex(v).total_hits(), 2);
    assert!(matches!(
        twice.vertex(v).kind(),
        VertexKind::Query {
            query_type: QueryType::Select,
            ..
        }
    ));
}

#[test]
fn test_branching_probabilities_sum_to_one() {
    // 3 of 4 payments stay local, one updates the remote warehouse
    let traces = vec![
        payment_trace(1, 0, 0),
        payment_trace(2, 0, 0),
        payment_trace(3, 0, 0),
        payment_trace(4, 0, 1),
    ];
    let graph = trained(&traces);
    assert!(is_sane(&graph));

    let read = graph
        .find_vertex(PAY_GET_WAREHOUSE, 0, &set(&[0]))
        .expect("read vertex");
    let local = graph
        .find_vertex(PAY_UPDATE_REMOTE, 0, &set(&[0]))
        .expect("local update");
    let remote = graph
        .find_vertex(PAY_UPDATE_REMOTE, 0, &set(&[1]))
        .expect("remote update");

    let to_local = graph.find_edge(read, local).expect("edge");
    let to_remote = graph.find_edge(read, remote).expect("edge");
    assert!((graph.edge(to_local).probability() - 0.75).abs() < PROBABILITY_EPSILON);
    assert!((graph.edge(to_remote).probability() - 0.25).abs() < PROBABILITY_EPSILON);

    // only the local branch stays single-partition
    let sp = graph
        .vertex(read)
        .probabilities()
        .single_partition()
        .expect("computed");
    assert!((sp - 0.75).abs() < PROBABILITY_EPSILON);
    let remote_probs = graph.vertex(remote).probabilities();
    assert_eq!(remote_probs.single_partition(), Some(0.0));
    assert_eq!(remote_probs.write(p(1)), Some(1.0));
    assert_eq!(remote_probs.done(p(1)), Some(0.0));
}

#[test]
fn test_sentinel_probabilities() {
    let graph = trained(&[new_order_trace(1, 1, 7)]);
    let commit = graph.vertex(graph.commit()).probabilities();
    assert_eq!(commit.single_partition(), Some(1.0));
    assert_eq!(commit.abort(), Some(0.0));
    assert_eq!(commit.done(p(0)), Some(1.0));
    let abort = graph.vertex(graph.abort()).probabilities();
    assert_eq!(abort.abort(), Some(1.0));

    let start = graph.vertex(graph.start()).probabilities();
    assert_eq!(start.done(p(0)), Some(1.0));
    assert_eq!(start.done(p(1)), Some(0.0));
    assert_eq!(start.write(p(1)), Some(1.0));
    assert_eq!(start.abort(), Some(0.0));
}

#[test]
fn test_aborted_query_ends_trace_at_abort() {
    let mut trace = new_order_trace(1, 1, 7);
    trace.queries[1].aborted = true;
    let graph = trained(&[trace]);

    let item = graph
        .find_vertex(GET_ITEM, 0, &set(&[1]))
        .expect("item vertex");
    assert!(graph.find_edge(item, graph.abort()).is_some());
    assert!(graph
        .find_vertex(UPDATE_DISTRICT, 0, &set(&[1]))
        .is_none());
    assert_eq!(graph.vertex(graph.commit()).total_hits(), 0);
    assert_eq!(
        graph.vertex(graph.start()).probabilities().abort(),
        Some(1.0)
    );
}

#[test]
fn test_repeated_statement_gets_new_instance() {
    let mut trace = new_order_trace(1, 1, 7);
    trace.push_query(GET_ITEM, vec![ParamValue::Int(8)], 0);
    let graph = trained(&[trace]);
    assert!(graph.find_vertex(GET_ITEM, 0, &set(&[1])).is_some());
    assert!(graph.find_vertex(GET_ITEM, 1, &set(&[1])).is_some());
    assert_sane(&graph);
}

#[test]
fn test_execution_time_is_averaged() {
    let mut a = new_order_trace(1, 1, 7);
    let mut b = new_order_trace(2, 1, 7);
    a.queries[0].elapsed_ns = Some(1_000);
    b.queries[0].elapsed_ns = Some(3_000);
    let graph = trained(&[a, b]);
    let v = graph
        .find_vertex(GET_WAREHOUSE, 0, &set(&[1]))
        .expect("vertex");
    assert_eq!(graph.vertex(v).avg_execution_time_ns(), Some(2_000));
    let item = graph.find_vertex(GET_ITEM, 0, &set(&[1])).expect("vertex");
    assert_eq!(graph.vertex(item).avg_execution_time_ns(), None);
}

#[test]
fn test_reset_counters_drops_unfolded_hits() {
    let catalog = Arc::new(catalog());
    let pest = estimator(&catalog);
    let proc = catalog.procedure(NEW_ORDER).expect("procedure");
    let mut graph = trained(&[new_order_trace(1, 1, 7)]);
    graph
        .process_transaction(&new_order_trace(2, 1, 7), proc, &pest)
        .expect("process");
    assert_eq!(graph.instance_txn_count(), 1);
    assert!(graph.vertex(graph.start()).instance_hits() > 0);

    graph.reset_counters();
    assert_eq!(graph.instance_txn_count(), 0);
    assert_eq!(graph.vertex(graph.start()).instance_hits(), 0);
    graph.recompute_graph();
    assert_eq!(graph.vertex(graph.start()).total_hits(), 1);
}

#[test]
fn test_should_recompute_detects_drift() {
    let catalog = Arc::new(catalog());
    let pest = estimator(&catalog);
    let proc = catalog.procedure(PAYMENT).expect("procedure");
    let local: Vec<_> = (0..10).map(|i| payment_trace(i, 0, 0)).collect();
    let mut graph = trained(&local);
    assert!(!graph.should_recompute(0.05, 0.5));

    // same shape again: rates unchanged
    for t in &local {
        graph.process_transaction(t, proc, &pest).expect("process");
    }
    assert!(!graph.should_recompute(0.05, 0.5));
    graph.recompute_graph();

    // every transaction now goes remote: new vertices appear with no history
    for i in 0..10 {
        graph
            .process_transaction(&payment_trace(100 + i, 0, 1), proc, &pest)
            .expect("process");
    }
    assert!(graph.should_recompute(0.05, 0.3));
}

#[test]
fn test_cycle_does_not_break_probabilities() {
    let mut graph = MarkovGraph::initialized(NEW_ORDER, p(1), 2);
    let a = graph.get_or_create_query(GET_WAREHOUSE, 0, set(&[1]), QueryType::Select);
    let b = graph.get_or_create_query(GET_ITEM, 0, set(&[1]), QueryType::Select);
    let (start, commit) = (graph.start(), graph.commit());
    graph.add_to_edge(start, a);
    graph.add_to_edge(a, b);
    graph.add_to_edge(b, a);
    graph.add_to_edge(b, commit);
    graph.recompute_graph();

    let probs = graph.vertex(start).probabilities();
    assert!(probs.is_complete());
    assert!(is_sane(&graph));
}
