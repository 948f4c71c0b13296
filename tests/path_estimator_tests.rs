//! Forward walks over trained graphs.

mod common;

use std::sync::Arc;

use common::*;
use markovdb_core::catalog::{Catalog, QueryType};
use markovdb_core::config::EstimationThresholds;
use markovdb_core::id::PartitionSet;
use markovdb_core::mappings::{MappingPolicy, ParameterMapping, ParameterMappingsSet};
use markovdb_core::params::ParamValue;
use markovdb_core::trace::TransactionTrace;
use markovdb_designer::CatalogPartitionEstimator;
use markovdb_markov::{MarkovGraph, MarkovPathEstimator, PathContext, PROBABILITY_EPSILON};
use markovdb_pool::Poolable;

struct Fixture {
    catalog: Arc<Catalog>,
    pest: CatalogPartitionEstimator,
    mappings: ParameterMappingsSet,
}

impl Fixture {
    fn new() -> Self {
        let catalog = Arc::new(catalog());
        let pest = estimator(&catalog);
        Self {
            catalog,
            pest,
            mappings: mappings(),
        }
    }

    fn train(&self, traces: &[TransactionTrace]) -> MarkovGraph {
        let first = &traces[0];
        let proc = self.catalog.procedure(first.proc).expect("procedure");
        let base = markovdb_core::estimator::PartitionEstimator::base_partition(&self.pest, proc, &first.params)
            .expect("base");
        let mut graph = MarkovGraph::initialized(proc.id, base, self.catalog.num_partitions);
        for t in traces {
            graph.process_transaction(t, proc, &self.pest).expect("process");
        }
        graph.recompute_graph();
        graph
    }

    fn walk(
        &self,
        graph: &MarkovGraph,
        mappings: &ParameterMappingsSet,
        args: &[ParamValue],
        force_traversal: bool,
    ) -> MarkovPathEstimator {
        let proc = self.catalog.procedure(graph.proc()).expect("procedure");
        let ctx = PathContext {
            graph,
            proc,
            mappings,
            pest: &self.pest,
            args,
            policy: MappingPolicy::FirstFound,
            force_traversal,
            min_hits_for_abort: 20,
        };
        let mut path = MarkovPathEstimator::new();
        path.traverse(&ctx, graph.start()).expect("traverse");
        path
    }
}

fn set(ids: &[u32]) -> PartitionSet {
    ids.iter().copied().map(p).collect()
}

#[test]
fn test_trained_single_partition_path() {
    let fx = Fixture::new();
    let traces: Vec<_> = (0..50).map(|i| new_order_trace(i, 1, 3)).collect();
    let graph = fx.train(&traces);
    let path = fx.walk(&graph, &fx.mappings, &new_order_args(1, 3), false);

    let t = EstimationThresholds::default();
    let est = path.estimate();
    assert_eq!(path.visited_path().len(), 5);
    assert_eq!(*path.visited_path().last().expect("path"), graph.commit());
    assert!(path.forced_vertices().is_empty());
    assert!((path.confidence() - 1.0).abs() < PROBABILITY_EPSILON);

    assert_eq!(est.touched_partitions(&t), set(&[1]));
    assert_eq!(path.touched_partitions(), &set(&[1]));
    assert!(est.is_single_partition(&t));
    assert!(est.single_partition_probability().expect("set") > 0.0);
    assert_eq!(est.abort_probability(), Some(0.0));
    assert!(!est.is_abortable(&t));
    assert_eq!(est.write_partitions(&t), set(&[1]));
    assert_eq!(est.finished_partitions(&t), set(&[0]));
    assert!(est.is_valid());
}

#[test]
fn test_young_graph_is_assumed_abortable() {
    let fx = Fixture::new();
    let traces: Vec<_> = (0..5).map(|i| new_order_trace(i, 1, 3)).collect();
    let graph = fx.train(&traces);
    let path = fx.walk(&graph, &fx.mappings, &new_order_args(1, 3), false);
    assert_eq!(path.estimate().abort_probability(), Some(1.0));
}

#[test]
fn test_branch_follows_parameters() {
    let fx = Fixture::new();
    let traces = vec![
        payment_trace(1, 0, 0),
        payment_trace(2, 0, 0),
        payment_trace(3, 0, 0),
        payment_trace(4, 0, 1),
    ];
    let graph = fx.train(&traces);
    let t = EstimationThresholds::default();

    let local = fx.walk(&graph, &fx.mappings, &[ParamValue::Int(0), ParamValue::Int(0)], false);
    assert_eq!(local.estimate().touched_partitions(&t), set(&[0]));
    assert!((local.confidence() - 1.0).abs() < PROBABILITY_EPSILON);

    // the remote branch is the only candidate matching c_w_id = 1
    let remote = fx.walk(&graph, &fx.mappings, &[ParamValue::Int(0), ParamValue::Int(1)], false);
    assert_eq!(remote.touched_partitions(), &set(&[0, 1]));
    assert!(!remote.estimate().is_single_partition(&t));
    assert_eq!(remote.estimate().write_partitions(&t), set(&[1]));
}

#[test]
fn test_missing_mapping_stops_without_force() {
    let fx = Fixture::new();
    let traces: Vec<_> = (0..30).map(|i| new_order_trace(i, 1, 3)).collect();
    let graph = fx.train(&traces);
    let empty = ParameterMappingsSet::new();

    let stuck = fx.walk(&graph, &empty, &new_order_args(1, 3), false);
    assert_eq!(stuck.visited_path(), &[graph.start()]);
    assert!(stuck.touched_partitions().is_empty());
}

#[test]
fn test_force_traversal_reaches_terminal() {
    let fx = Fixture::new();
    let traces: Vec<_> = (0..30).map(|i| new_order_trace(i, 1, 3)).collect();
    let graph = fx.train(&traces);

    // only the first statement has a correlation; the next two statements must be forced
    let mut partial = ParameterMappingsSet::new();
    partial.add(ParameterMapping {
        proc: NEW_ORDER,
        stmt: GET_WAREHOUSE,
        instance: 0,
        stmt_param: 0,
        proc_param: 0,
        proc_param_index: None,
        coefficient: 1.0,
    });
    let path = fx.walk(&graph, &partial, &new_order_args(1, 3), true);
    let last = *path.visited_path().last().expect("path");
    assert!(last == graph.commit() || last == graph.abort());
    assert_eq!(path.forced_vertices().len(), 2);
    assert!(path.estimate().is_valid());
}

#[test]
fn test_array_index_out_of_range_skips_candidate() {
    let fx = Fixture::new();
    let traces: Vec<_> = (0..30).map(|i| new_order_trace(i, 1, 3)).collect();
    let graph = fx.train(&traces);
    // i_ids is empty, so getItem cannot be mapped
    let args = vec![ParamValue::Int(1), ParamValue::Array(vec![])];
    let path = fx.walk(&graph, &fx.mappings, &args, false);
    assert_eq!(path.visited_path().len(), 2);
    let warehouse = graph
        .find_vertex(GET_WAREHOUSE, 0, &set(&[1]))
        .expect("vertex");
    assert_eq!(path.visited_path()[1], warehouse);
}

#[test]
fn test_finish_resets_for_reuse() {
    let fx = Fixture::new();
    let traces: Vec<_> = (0..30).map(|i| new_order_trace(i, 1, 3)).collect();
    let graph = fx.train(&traces);
    let mut path = fx.walk(&graph, &fx.mappings, &new_order_args(1, 3), false);
    assert!(path.is_initialized());
    path.finish();
    assert!(!path.is_initialized());
    assert!(path.visited_path().is_empty());
    assert!(path.touched_partitions().is_empty());
}

#[test]
fn test_walk_terminates_on_cycle() {
    let fx = Fixture::new();
    let mut graph = MarkovGraph::initialized(NEW_ORDER, p(1), 2);
    let a = graph.get_or_create_query(GET_WAREHOUSE, 0, set(&[1]), QueryType::Select);
    let b = graph.get_or_create_query(GET_ITEM, 0, set(&[1]), QueryType::Select);
    let (start, commit) = (graph.start(), graph.commit());
    graph.add_to_edge(start, a);
    graph.add_to_edge(a, b);
    graph.add_to_edge(b, a);
    graph.add_to_edge(b, commit);
    graph.recompute_graph();

    let path = fx.walk(&graph, &fx.mappings, &new_order_args(1, 3), true);
    assert_eq!(path.visited_path(), &[start, a, b, commit]);
    assert!(path.estimate().is_valid());
}
