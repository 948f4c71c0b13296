//! Debug-time verification helpers for execution-path graphs.
//!
//! Intended for tests and debug builds, never the hot path.

use std::collections::HashSet;

use crate::graph::MarkovGraph;
use crate::vertex::VertexId;

/// Tolerance for outgoing probability mass.
pub const PROBABILITY_EPSILON: f64 = 0.00001;

/// A single failed check.
#[derive(Debug, Clone, PartialEq)]
pub enum SanityViolation {
    DuplicateEdge { src: VertexId, dst: VertexId },
    ProbabilityMass { vertex: VertexId, total: f64 },
}

/// Every violation found in `graph`.
pub fn violations(graph: &MarkovGraph) -> Vec<SanityViolation> {
    let mut out = Vec::new();
    for v in graph.vertex_ids() {
        let mut seen = HashSet::new();
        let mut total = 0.0;
        let edges = graph.out_edges(v);
        for &e in edges {
            let edge = graph.edge(e);
            if !seen.insert(edge.dst()) {
                out.push(SanityViolation::DuplicateEdge {
                    src: v,
                    dst: edge.dst(),
                });
            }
            total += edge.probability();
        }
        if !edges.is_empty() && (total - 1.0).abs() > PROBABILITY_EPSILON {
            out.push(SanityViolation::ProbabilityMass { vertex: v, total });
        }
    }
    out
}

pub fn is_sane(graph: &MarkovGraph) -> bool {
    violations(graph).is_empty()
}

/// Panic with the first violation.
pub fn assert_sane(graph: &MarkovGraph) {
    if let Some(v) = violations(graph).first() {
        panic!(
            "graph for {} at partition {} is not sane: {v:?}",
            graph.proc(),
            graph.base_partition()
        );
    }
}
