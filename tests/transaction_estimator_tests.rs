//! Online estimation over a shared graph container.

mod common;

use std::sync::Arc;

use common::*;
use markovdb_core::catalog::{Catalog, Procedure, Statement};
use markovdb_core::error::Result;
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionId, PartitionSet, TxnId};
use markovdb_core::params::ParamValue;
use markovdb_core::trace::TransactionTrace;
use markovdb_designer::CatalogPartitionEstimator;
use markovdb_markov::{
    EstimateBatch, EstimatorConfig, MarkovGraphsContainer, TransactionEstimator, VertexKind,
};

fn estimator_with(catalog: &Arc<Catalog>, graphs: Arc<MarkovGraphsContainer>) -> TransactionEstimator {
    TransactionEstimator::new(
        Arc::clone(catalog),
        Arc::new(estimator(catalog)),
        Arc::new(mappings()),
        graphs,
        EstimatorConfig::default(),
    )
}

fn set(ids: &[u32]) -> PartitionSet {
    ids.iter().copied().map(p).collect()
}

/// payment at warehouse 0 that only reads its warehouse and commits.
fn payment_read_only_trace(txn: u64) -> TransactionTrace {
    let mut trace = TransactionTrace::new(
        TxnId::new(txn),
        PAYMENT,
        vec![ParamValue::Int(0), ParamValue::Int(0)],
    );
    trace.push_query(PAY_GET_WAREHOUSE, vec![ParamValue::Int(0)], 0);
    trace
}

/// Routes invocations like the catalog estimator but places no statement
/// on any partition.
struct Nowhere(CatalogPartitionEstimator);

impl PartitionEstimator for Nowhere {
    fn num_partitions(&self) -> u32 {
        self.0.num_partitions()
    }

    fn base_partition(&self, proc: &Procedure, params: &[ParamValue]) -> Result<PartitionId> {
        self.0.base_partition(proc, params)
    }

    fn statement_partitions(
        &self,
        _proc: &Procedure,
        _stmt: &Statement,
        _params: &[ParamValue],
        _base_partition: PartitionId,
    ) -> Result<PartitionSet> {
        Ok(PartitionSet::new())
    }
}

#[test]
fn test_untrained_graph_created_on_start() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let est = estimator_with(&catalog, Arc::clone(&graphs));

    let state = est
        .start_transaction(TxnId::new(1), NEW_ORDER, &new_order_args(1, 3))
        .expect("start");
    assert_eq!(state.base_partition(), p(1));
    assert_eq!(graphs.len(), 1);
    assert!(graphs.get(p(1), NEW_ORDER).is_some());
    // nothing to walk yet
    assert_eq!(state.initial_path().len(), 1);
    assert_eq!(state.initial_estimate().abort_probability(), Some(1.0));
    assert_eq!(state.estimate_count(), 0);
}

#[test]
fn test_trained_initial_estimate() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let traces: Vec<_> = (0..50).map(|i| new_order_trace(i, 1, 3)).collect();
    graphs
        .train(&catalog, &estimator(&catalog), &traces)
        .expect("train");
    let est = estimator_with(&catalog, graphs);

    let state = est
        .start_transaction(TxnId::new(100), NEW_ORDER, &new_order_args(1, 9))
        .expect("start");
    let initial = state.initial_estimate();
    let t = est.thresholds();
    assert_eq!(state.initial_path().len(), 5);
    assert_eq!(initial.batch(), Some(EstimateBatch::Initial));
    assert_eq!(initial.touched_partitions(t), set(&[1]));
    assert!(initial.is_single_partition(t));
    assert!(!initial.is_abortable(t));
    assert_eq!(initial.confidence(), Some(1.0));
    assert!(initial.is_valid());
}

#[test]
fn test_one_estimate_per_batch() {
    let catalog = Arc::new(catalog());
    let est = estimator_with(&catalog, Arc::new(MarkovGraphsContainer::new()));
    let trace = payment_trace(7, 0, 1);

    let state = est.process_transaction_trace(&trace).expect("replay");
    assert_eq!(state.estimate_count(), 2);
    let batches: Vec<_> = state.estimates().map(|e| e.batch()).collect();
    assert_eq!(
        batches,
        vec![Some(EstimateBatch::Batch(0)), Some(EstimateBatch::Batch(1))]
    );
    // START plus one vertex per query
    assert_eq!(state.actual_path().len(), 3);

    let graph = state.graph().read();
    let last = *state.actual_path().last().expect("path");
    assert_eq!(state.last_estimate().vertex(), Some(last));
    match graph.vertex(last).kind() {
        VertexKind::Query { stmt, partitions, .. } => {
            assert_eq!(*stmt, PAY_UPDATE_REMOTE);
            assert_eq!(*partitions, set(&[1]));
        }
        other => panic!("unexpected vertex {other:?}"),
    }
    assert_eq!(state.touched_counts().fast_get(0), 1);
    assert_eq!(state.touched_counts().fast_get(1), 1);

    // every batch estimate comes from a full walk, even on an untrained graph
    let estimates: Vec<_> = state.estimates().collect();
    for e in &estimates {
        assert!(e.is_valid(), "incomplete batch estimate {e:?}");
        assert_eq!(e.confidence(), Some(1.0));
        // no START history yet
        assert_eq!(e.abort_probability(), Some(1.0));
        assert!(e.single_partition_probability().is_some());
    }
    assert_eq!(estimates[0].vertex(), Some(state.actual_path()[1]));
    assert_eq!(estimates[0].probabilities().read_only(p(0)), Some(1.0));
    assert_eq!(estimates[1].probabilities().write(p(1)), Some(1.0));
    assert_eq!(estimates[1].probabilities().read_only(p(1)), Some(0.0));
    assert_eq!(estimates[1].touched_counter().fast_get(0), 1);
    assert_eq!(estimates[1].touched_counter().fast_get(1), 1);
}

#[test]
fn test_batch_estimates_refine_along_path() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    // after the warehouse read: 6 remote updates, 2 commits
    let mut traces: Vec<_> = (0..6).map(|i| payment_trace(i, 0, 1)).collect();
    traces.extend((6..8).map(payment_read_only_trace));
    graphs
        .train(&catalog, &estimator(&catalog), &traces)
        .expect("train");
    let est = estimator_with(&catalog, graphs);

    let state = est
        .process_transaction_trace(&payment_trace(100, 0, 1))
        .expect("replay");
    let initial = state.initial_estimate();
    assert_eq!(initial.confidence(), Some(0.75));
    assert_eq!(initial.probabilities().write(p(1)), Some(0.75));

    let estimates: Vec<_> = state.estimates().collect();
    assert_eq!(estimates.len(), 2);
    // still one open branch after the read
    assert_eq!(estimates[0].confidence(), Some(0.75));
    assert_eq!(estimates[0].probabilities().write(p(1)), Some(0.75));
    // the remote write has happened
    assert_eq!(estimates[1].confidence(), Some(1.0));
    assert_eq!(estimates[1].probabilities().write(p(1)), Some(1.0));
    assert!(estimates.iter().all(|e| e.is_valid()));
}

#[test]
fn test_aborting_query_links_abort() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let est = estimator_with(&catalog, Arc::clone(&graphs));
    let mut trace = payment_trace(9, 0, 1);
    trace.queries[0].aborted = true;

    let state = est.process_transaction_trace(&trace).expect("replay");
    assert!(state.is_aborted());
    // the second batch never ran
    assert_eq!(state.estimate_count(), 1);
    assert_eq!(state.actual_path().len(), 3);
    {
        let graph = state.graph().read();
        let path = state.actual_path();
        assert_eq!(path[2], graph.abort());
        assert!(graph.find_edge(path[1], graph.abort()).is_some());
        assert_eq!(state.last_estimate().vertex(), Some(graph.abort()));
    }
    assert!(!est.abort(state));

    let shared = graphs.get(p(0), PAYMENT).expect("graph");
    let graph = shared.read();
    assert_eq!(graph.txn_count(), 1);
    // linked once, by the query
    assert_eq!(graph.vertex(graph.abort()).instance_hits(), 1);
    assert_eq!(graph.vertex(graph.commit()).instance_hits(), 0);
}

#[test]
fn test_queries_after_abort_rejected() {
    let catalog = Arc::new(catalog());
    let est = estimator_with(&catalog, Arc::new(MarkovGraphsContainer::new()));
    let mut trace = payment_trace(9, 0, 1);
    trace.queries[0].aborted = true;
    let mut state = est.process_transaction_trace(&trace).expect("replay");

    let remote = payment_trace(9, 0, 1).queries[1..].to_vec();
    assert!(est.execute_queries(&mut state, &remote).is_err());
    assert_eq!(state.estimate_count(), 1);
}

#[test]
fn test_statement_without_partitions_rejected() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let est = TransactionEstimator::new(
        Arc::clone(&catalog),
        Arc::new(Nowhere(estimator(&catalog))),
        Arc::new(mappings()),
        Arc::clone(&graphs),
        EstimatorConfig::default(),
    );

    assert!(est.process_transaction_trace(&payment_trace(1, 0, 1)).is_err());
    let shared = graphs.get(p(0), PAYMENT).expect("graph");
    // only the sentinels
    assert_eq!(shared.read().vertex_count(), 3);
}

#[test]
fn test_repeated_statement_counts_instances() {
    let catalog = Arc::new(catalog());
    let est = estimator_with(&catalog, Arc::new(MarkovGraphsContainer::new()));
    let mut trace = new_order_trace(3, 0, 4);
    trace.push_query(
        GET_ITEM,
        vec![markovdb_core::params::ParamValue::Int(5)],
        0,
    );

    let state = est.process_transaction_trace(&trace).expect("replay");
    let graph = state.graph().read();
    let last = *state.actual_path().last().expect("path");
    match graph.vertex(last).kind() {
        VertexKind::Query { stmt, instance, .. } => {
            assert_eq!(*stmt, GET_ITEM);
            assert_eq!(*instance, 1);
        }
        other => panic!("unexpected vertex {other:?}"),
    }
}

#[test]
fn test_commit_and_abort_close_path() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let est = estimator_with(&catalog, Arc::clone(&graphs));

    let committed = est
        .process_transaction_trace(&new_order_trace(1, 0, 2))
        .expect("replay");
    assert!(!est.commit(committed));
    let aborted = est
        .process_transaction_trace(&new_order_trace(2, 0, 2))
        .expect("replay");
    assert!(!est.abort(aborted));

    let shared = graphs.get(p(0), NEW_ORDER).expect("graph");
    let graph = shared.read();
    assert_eq!(graph.txn_count(), 2);
    assert_eq!(graph.vertex(graph.commit()).instance_hits(), 1);
    assert_eq!(graph.vertex(graph.abort()).instance_hits(), 1);
    assert_eq!(graph.vertex(graph.start()).instance_hits(), 2);
}

#[test]
fn test_recompute_after_minimum_transactions() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let est = estimator_with(&catalog, Arc::clone(&graphs));
    let min = est.config().recompute_min_txns;

    for i in 0..min - 1 {
        let state = est
            .process_transaction_trace(&new_order_trace(i, 1, 3))
            .expect("replay");
        assert!(!est.commit(state), "recomputed early at txn {i}");
    }
    let state = est
        .process_transaction_trace(&new_order_trace(min, 1, 3))
        .expect("replay");
    assert!(est.commit(state));

    let shared = graphs.get(p(1), NEW_ORDER).expect("graph");
    let graph = shared.read();
    assert_eq!(graph.instance_txn_count(), 0);
    assert_eq!(graph.vertex(graph.start()).total_hits(), min);
    assert_eq!(graph.vertex(graph.commit()).probabilities().done(p(1)), Some(1.0));
}

#[test]
fn test_concurrent_transactions_share_graph() {
    let catalog = Arc::new(catalog());
    let graphs = Arc::new(MarkovGraphsContainer::new());
    let est = estimator_with(&catalog, Arc::clone(&graphs));

    std::thread::scope(|s| {
        for worker in 0..4u64 {
            let est = &est;
            s.spawn(move || {
                for i in 0..25u64 {
                    let txn = worker * 100 + i;
                    let state = est
                        .process_transaction_trace(&new_order_trace(txn, 0, 1))
                        .expect("replay");
                    est.commit(state);
                }
            });
        }
    });

    let shared = graphs.get(p(0), NEW_ORDER).expect("graph");
    let graph = shared.read();
    assert_eq!(graph.txn_count(), 100);
    let [paths, estimates] = est.pool_stats();
    assert_eq!(paths.active, 0);
    assert_eq!(estimates.active, 0);
}
